use std::sync::atomic::{AtomicU32, Ordering};
use tensile::{
    ActivationKind, CostKind, LayerDesc, Network, Optimizer, Shape, Tensor, TrainDesc,
    TransformRanges,
};

/// Tiny two-class dataset: class 0 samples lean left, class 1 lean right.
fn toy_dataset(n: u32) -> (Tensor, Tensor) {
    let mut inputs = Tensor::new(Shape::new(4, 1, n)).unwrap();
    let mut targets = Tensor::new(Shape::new(2, 1, n)).unwrap();

    for i in 0..n as usize {
        let class = i % 2;
        let base = i * 4;
        let data = inputs.data_mut();
        if class == 0 {
            data[base] = 1.0;
            data[base + 1] = 0.8;
        } else {
            data[base + 2] = 1.0;
            data[base + 3] = 0.8;
        }
        targets.data_mut()[i * 2 + class] = 1.0;
    }

    (inputs, targets)
}

fn classifier_descs() -> Vec<LayerDesc> {
    vec![
        LayerDesc::input(Shape::new(4, 1, 1)),
        LayerDesc::dense(8),
        LayerDesc::activation(ActivationKind::Tanh),
        LayerDesc::dense(2),
        LayerDesc::activation(ActivationKind::Softmax),
    ]
}

#[test]
fn multithreaded_training_learns_the_toy_problem() {
    tensile::rng::reseed(5);
    let mut nn = Network::new(&classifier_descs(), true).unwrap();

    let (inputs, targets) = toy_dataset(32);
    let desc = TrainDesc::new(
        30,
        8,
        CostKind::CategoricalCrossEntropy,
        Optimizer::adam(0.01, 0.9, 0.999, 1e-8),
        &inputs,
        &targets,
    )
    .threads(4)
    .test_data(&inputs, &targets);

    let last_accuracy = AtomicU32::new(0);
    let desc = desc.on_epoch(|info| {
        if let Some(acc) = info.test_accuracy {
            last_accuracy.store(acc.to_bits(), Ordering::SeqCst);
        }
    });

    nn.train(&desc).unwrap();
    drop(desc);

    let accuracy = f32::from_bits(last_accuracy.load(Ordering::SeqCst));
    assert!(
        accuracy > 0.9,
        "expected the toy problem to be learned, accuracy was {accuracy}"
    );
}

#[test]
fn epoch_callback_fires_once_per_epoch() {
    tensile::rng::reseed(6);
    let mut nn = Network::new(&classifier_descs(), true).unwrap();
    let (inputs, targets) = toy_dataset(8);

    let calls = AtomicU32::new(0);
    let desc = TrainDesc::new(
        3,
        4,
        CostKind::CategoricalCrossEntropy,
        Optimizer::sgd(0.05, 0.9),
        &inputs,
        &targets,
    )
    .threads(2)
    .on_epoch(|info| {
        assert!(info.test_accuracy.is_none());
        calls.fetch_add(1, Ordering::SeqCst);
    });

    nn.train(&desc).unwrap();
    drop(desc);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn uneven_final_batch_is_handled() {
    tensile::rng::reseed(8);
    let mut nn = Network::new(&classifier_descs(), true).unwrap();

    // 10 samples with batch size 4 leaves a final batch of 2.
    let (inputs, targets) = toy_dataset(10);
    let desc = TrainDesc::new(
        2,
        4,
        CostKind::CategoricalCrossEntropy,
        Optimizer::sgd(0.05, 0.9),
        &inputs,
        &targets,
    )
    .threads(3);

    nn.train(&desc).unwrap();
}

#[test]
fn augmented_training_runs_on_image_shaped_inputs() {
    tensile::rng::reseed(9);
    let mut nn = Network::new(
        &[
            LayerDesc::input(Shape::new(8, 8, 1)),
            LayerDesc::flatten(),
            LayerDesc::dense(2),
            LayerDesc::activation(ActivationKind::Softmax),
        ],
        true,
    )
    .unwrap();

    let mut inputs = Tensor::new(Shape::new(64, 1, 6)).unwrap();
    for (i, v) in inputs.data_mut().iter_mut().enumerate() {
        *v = ((i / 8) % 2) as f32;
    }
    let mut targets = Tensor::new(Shape::new(2, 1, 6)).unwrap();
    for i in 0..6 {
        targets.data_mut()[i * 2 + (i % 2)] = 1.0;
    }

    let desc = TrainDesc::new(
        2,
        3,
        CostKind::CategoricalCrossEntropy,
        Optimizer::rms_prop(0.01, 0.9, 1e-8),
        &inputs,
        &targets,
    )
    .threads(2)
    .transforms(TransformRanges {
        min_translation: -1.0,
        max_translation: 1.0,
        min_scale: 0.9,
        max_scale: 1.1,
        min_angle: -0.2,
        max_angle: 0.2,
    });

    nn.train(&desc).unwrap();
}

#[test]
fn checkpoints_are_written_at_the_interval() {
    tensile::rng::reseed(10);
    let mut nn = Network::new(&classifier_descs(), true).unwrap();
    let (inputs, targets) = toy_dataset(4);

    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("ckpt_").to_string_lossy().into_owned();

    let desc = TrainDesc::new(
        4,
        2,
        CostKind::CategoricalCrossEntropy,
        Optimizer::sgd(0.05, 0.9),
        &inputs,
        &targets,
    )
    .checkpoints(2, prefix.clone());

    nn.train(&desc).unwrap();

    assert!(std::path::Path::new(&format!("{prefix}0002.tsn")).exists());
    assert!(std::path::Path::new(&format!("{prefix}0004.tsn")).exists());
    assert!(!std::path::Path::new(&format!("{prefix}0001.tsn")).exists());

    // Checkpoints are loadable models.
    let loaded = Network::load(format!("{prefix}0004.tsn"), false).unwrap();
    assert_eq!(loaded.descs(), nn.descs());
}
