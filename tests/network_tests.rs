use tensile::{
    ActivationKind, CostKind, LayerDesc, Network, Optimizer, PoolKind, Shape, Tensor, TrainDesc,
};

fn mnist_shaped_descs() -> Vec<LayerDesc> {
    vec![
        LayerDesc::input(Shape::new(28, 28, 1)),
        LayerDesc::conv_2d(8, 3, true),
        LayerDesc::activation(ActivationKind::Relu),
        LayerDesc::pooling_2d(2, 2, PoolKind::Max),
        LayerDesc::flatten(),
        LayerDesc::dense(10),
        LayerDesc::activation(ActivationKind::Softmax),
    ]
}

#[test]
fn mnist_shaped_forward_yields_a_distribution() {
    let nn = Network::new(&mnist_shaped_descs(), false).unwrap();
    assert_eq!(nn.input_shape(), Shape::new(28, 28, 1));
    assert_eq!(nn.output_shape(), Shape::new(10, 1, 1));

    let input = Tensor::new(Shape::new(28, 28, 1)).unwrap();
    let mut out = Tensor::new(Shape::new(10, 1, 1)).unwrap();
    nn.feedforward(&input, &mut out).unwrap();

    let sum: f32 = out.data().iter().sum();
    assert!((sum - 1.0).abs() < 1e-5);
}

#[test]
fn one_batch_decreases_the_loss_of_its_sample() {
    tensile::rng::reseed(1234);
    let mut nn = Network::new(&mnist_shaped_descs(), true).unwrap();

    // One sample: a blob of nonzero pixels, labelled class 3.
    let mut inputs = Tensor::new(Shape::new(784, 1, 1)).unwrap();
    for (i, v) in inputs.data_mut().iter_mut().enumerate() {
        *v = ((i % 17) as f32) / 17.0;
    }
    let mut targets = Tensor::new(Shape::new(10, 1, 1)).unwrap();
    targets.data_mut()[3] = 1.0;

    let loss_of = |nn: &Network| -> f32 {
        let mut out = Tensor::new(Shape::new(10, 1, 1)).unwrap();
        nn.feedforward(&inputs, &mut out).unwrap();
        CostKind::CategoricalCrossEntropy
            .value(&out, &targets)
            .unwrap()
    };

    let before = loss_of(&nn);

    let desc = TrainDesc::new(
        1,
        1,
        CostKind::CategoricalCrossEntropy,
        Optimizer::sgd(0.05, 0.0),
        &inputs,
        &targets,
    );
    nn.train(&desc).unwrap();

    let after = loss_of(&nn);
    assert!(
        after < before,
        "loss should strictly decrease: {before} -> {after}"
    );
}

#[test]
fn inference_is_deterministic_for_a_fixed_input() {
    tensile::rng::reseed(99);
    let nn = Network::new(&mnist_shaped_descs(), false).unwrap();

    let mut input = Tensor::new(Shape::new(28, 28, 1)).unwrap();
    for (i, v) in input.data_mut().iter_mut().enumerate() {
        *v = (i % 7) as f32 / 7.0;
    }

    let mut a = Tensor::new(Shape::new(10, 1, 1)).unwrap();
    let mut b = Tensor::new(Shape::new(10, 1, 1)).unwrap();
    nn.feedforward(&input, &mut a).unwrap();
    nn.feedforward(&input, &mut b).unwrap();

    assert_eq!(a, b);
}

#[test]
fn training_an_inference_network_fails() {
    let mut nn = Network::new(
        &[LayerDesc::input(Shape::new(2, 1, 1)), LayerDesc::dense(1)],
        false,
    )
    .unwrap();

    let inputs = Tensor::new(Shape::new(2, 1, 1)).unwrap();
    let targets = Tensor::new(Shape::new(1, 1, 1)).unwrap();
    let desc = TrainDesc::new(
        1,
        1,
        CostKind::MeanSquaredError,
        Optimizer::sgd(0.1, 0.9),
        &inputs,
        &targets,
    );

    assert!(nn.train(&desc).is_err());
}

#[test]
fn dataset_shape_mismatches_are_rejected() {
    let mut nn = Network::new(
        &[LayerDesc::input(Shape::new(4, 1, 1)), LayerDesc::dense(2)],
        true,
    )
    .unwrap();

    let bad_inputs = Tensor::new(Shape::new(3, 1, 1)).unwrap();
    let targets = Tensor::new(Shape::new(2, 1, 1)).unwrap();
    let desc = TrainDesc::new(
        1,
        1,
        CostKind::MeanSquaredError,
        Optimizer::sgd(0.1, 0.9),
        &bad_inputs,
        &targets,
    );
    assert!(nn.train(&desc).is_err());
}

#[test]
fn misaligned_layer_shapes_fail_at_construction() {
    // Reshape that does not preserve the element count cannot be built.
    let err = Network::new(
        &[
            LayerDesc::input(Shape::new(4, 1, 1)),
            LayerDesc::reshape(Shape::new(3, 1, 1)),
        ],
        false,
    )
    .unwrap_err();
    assert_eq!(err.tag(), "bad-shape");
}
