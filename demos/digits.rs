//! Convolutional classifier over synthetic digit-like glyphs, with
//! hyperparameters read from JSON.
//!
//! ```sh
//! cargo run --example digits
//! ```

use serde::Deserialize;
use tensile::{
    ActivationKind, CostKind, LayerDesc, Network, Optimizer, PoolKind, Shape, Tensor, TrainDesc,
    TransformRanges,
};

#[derive(Deserialize)]
struct Hyperparams {
    epochs: u32,
    batch_size: u32,
    threads: u32,
    optim: Optimizer,
}

const CONFIG: &str = r#"{
    "epochs": 12,
    "batch_size": 16,
    "threads": 4,
    "optim": {
        "learning_rate": 0.005,
        "kind": { "adam": { "beta1": 0.9, "beta2": 0.999, "epsilon": 1e-8 } }
    }
}"#;

const SIDE: u32 = 12;
const CLASSES: u32 = 4;

/// Renders one of four simple glyphs (bar, frame, cross, dot) with a bit
/// of per-sample jitter from the deterministic index.
fn glyph(class: u32, jitter: u32) -> Vec<f32> {
    let mut img = vec![0.0f32; (SIDE * SIDE) as usize];
    let s = SIDE as usize;
    let j = (jitter % 3) as usize;

    match class {
        0 => {
            for y in 0..s {
                img[y * s + s / 2 - 1 + j] = 1.0;
            }
        }
        1 => {
            for i in 1..s - 1 {
                img[(1 + j / 2) * s + i] = 1.0;
                img[(s - 2) * s + i] = 1.0;
                img[i * s + 1 + j / 2] = 1.0;
                img[i * s + s - 2] = 1.0;
            }
        }
        2 => {
            for i in 0..s {
                img[i * s + i] = 1.0;
                img[i * s + (s - 1 - i)] = 1.0;
            }
        }
        _ => {
            for y in s / 2 - 2..s / 2 + 2 {
                for x in s / 2 - 2 + j..s / 2 + 2 {
                    img[y * s + x] = 1.0;
                }
            }
        }
    }

    img
}

fn dataset(n: u32) -> anyhow::Result<(Tensor, Tensor)> {
    let mut inputs = Tensor::new(Shape::new(SIDE * SIDE, 1, n))?;
    let mut targets = Tensor::new(Shape::new(CLASSES, 1, n))?;

    for i in 0..n {
        let class = i % CLASSES;
        let img = glyph(class, i / CLASSES);

        let base = (i * SIDE * SIDE) as usize;
        inputs.data_mut()[base..base + img.len()].copy_from_slice(&img);
        targets.data_mut()[(i * CLASSES + class) as usize] = 1.0;
    }

    Ok((inputs, targets))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let params: Hyperparams = serde_json::from_str(CONFIG)?;

    let descs = [
        LayerDesc::input(Shape::new(SIDE, SIDE, 1)),
        LayerDesc::conv_2d(8, 3, true),
        LayerDesc::activation(ActivationKind::Relu),
        LayerDesc::pooling_2d(2, 2, PoolKind::Max),
        LayerDesc::flatten(),
        LayerDesc::dense(32),
        LayerDesc::activation(ActivationKind::Relu),
        LayerDesc::dropout(0.9),
        LayerDesc::dense(CLASSES),
        LayerDesc::activation(ActivationKind::Softmax),
    ];
    let mut nn = Network::new(&descs, true)?;
    print!("{}", nn.summary());

    let (train_inputs, train_targets) = dataset(128)?;
    let (test_inputs, test_targets) = dataset(32)?;

    let desc = TrainDesc::new(
        params.epochs,
        params.batch_size,
        CostKind::CategoricalCrossEntropy,
        params.optim,
        &train_inputs,
        &train_targets,
    )
    .threads(params.threads)
    .test_data(&test_inputs, &test_targets)
    .transforms(TransformRanges {
        min_translation: -1.0,
        max_translation: 1.0,
        min_scale: 0.95,
        max_scale: 1.05,
        min_angle: -0.1,
        max_angle: 0.1,
    })
    .on_epoch(|info| {
        if let Some(acc) = info.test_accuracy {
            println!("epoch {}: accuracy {:.1}%", info.epoch + 1, acc * 100.0);
        }
    });

    nn.train(&desc)?;
    Ok(())
}
