//! XOR with a tiny dense network.
//!
//! ```sh
//! cargo run --example xor
//! ```

use tensile::{
    ActivationKind, CostKind, LayerDesc, Network, Optimizer, Shape, Tensor, TrainDesc,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let descs = [
        LayerDesc::input(Shape::new(2, 1, 1)),
        LayerDesc::dense(8),
        LayerDesc::activation(ActivationKind::Tanh),
        LayerDesc::dense(1),
        LayerDesc::activation(ActivationKind::Sigmoid),
    ];
    let mut nn = Network::new(&descs, true)?;
    print!("{}", nn.summary());

    // The four XOR rows, one per depth plane.
    let inputs = Tensor::from_data(
        Shape::new(2, 1, 4),
        &[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
    )?;
    let targets = Tensor::from_data(Shape::new(1, 1, 4), &[0.0, 1.0, 1.0, 0.0])?;

    let desc = TrainDesc::new(
        2000,
        4,
        CostKind::MeanSquaredError,
        Optimizer::adam(0.02, 0.9, 0.999, 1e-8),
        &inputs,
        &targets,
    )
    .threads(2);
    nn.train(&desc)?;

    let mut out = Tensor::new(Shape::new(1, 1, 1))?;
    let mut sample = Tensor::new(Shape::new(2, 1, 1))?;
    for z in 0..4 {
        sample.copy_plane_from(&inputs, z)?;
        nn.feedforward(&sample, &mut out)?;
        println!(
            "{:?} -> {:.3}",
            &sample.data(),
            out.data()[0]
        );
    }

    Ok(())
}
