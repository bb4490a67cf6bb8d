//! Multithreaded batch training.
//!
//! Each batch fans one task per sample out over a fixed-size rayon pool.
//! Workers share the network immutably; gradients meet in the layers'
//! mutex-protected accumulators, and the optimizer step runs after the
//! batch barrier. The order in which workers sum into an accumulator is
//! unspecified, so floating-point results are not bit-reproducible across
//! runs; every worker finishing before the optimizer step is guaranteed.

use super::Network;
use crate::cost::CostKind;
use crate::errors::{NnError, NnResult};
use crate::image::{self, Mat3, SampleKind};
use crate::layers::{Layer, LayersCache};
use crate::optim::Optimizer;
use crate::rng;
use crate::scratch;
use crate::tensor::Tensor;
use crate::types::Shape;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Ranges for the random affine augmentation applied to training inputs.
/// Each bound pair samples uniformly in [min, max).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct TransformRanges {
    pub min_translation: f32,
    pub max_translation: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    /// Radians.
    pub min_angle: f32,
    pub max_angle: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct EpochInfo {
    /// Starts at 0.
    pub epoch: u32,
    /// Present when an accuracy test ran this epoch.
    pub test_accuracy: Option<f32>,
}

pub type EpochCallback<'a> = Box<dyn Fn(&EpochInfo) + Send + Sync + 'a>;

/// Everything `Network::train` needs for a run.
pub struct TrainDesc<'a> {
    pub epochs: u32,
    pub batch_size: u32,
    pub num_threads: u32,
    pub cost: CostKind,
    pub optim: Optimizer,
    /// Random augmentation, when enabled.
    pub transforms: Option<TransformRanges>,
    /// Called after every epoch.
    pub epoch_callback: Option<EpochCallback<'a>>,
    /// Save a checkpoint every `save_interval` epochs; 0 disables.
    pub save_interval: u32,
    /// Checkpoint path prefix; the epoch number and `.tsn` are appended.
    pub save_path: String,
    /// One training sample per depth plane.
    pub train_inputs: &'a Tensor,
    pub train_targets: &'a Tensor,
    /// Held-out set for the per-epoch accuracy test.
    pub test_inputs: Option<&'a Tensor>,
    pub test_targets: Option<&'a Tensor>,
}

impl<'a> TrainDesc<'a> {
    pub fn new(
        epochs: u32,
        batch_size: u32,
        cost: CostKind,
        optim: Optimizer,
        train_inputs: &'a Tensor,
        train_targets: &'a Tensor,
    ) -> Self {
        Self {
            epochs,
            batch_size,
            num_threads: 1,
            cost,
            optim,
            transforms: None,
            epoch_callback: None,
            save_interval: 0,
            save_path: String::new(),
            train_inputs,
            train_targets,
            test_inputs: None,
            test_targets: None,
        }
    }

    pub fn threads(mut self, num_threads: u32) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn transforms(mut self, ranges: TransformRanges) -> Self {
        self.transforms = Some(ranges);
        self
    }

    pub fn test_data(mut self, inputs: &'a Tensor, targets: &'a Tensor) -> Self {
        self.test_inputs = Some(inputs);
        self.test_targets = Some(targets);
        self
    }

    pub fn checkpoints(mut self, interval: u32, path_prefix: impl Into<String>) -> Self {
        self.save_interval = interval;
        self.save_path = path_prefix.into();
        self
    }

    pub fn on_epoch(mut self, callback: impl Fn(&EpochInfo) + Send + Sync + 'a) -> Self {
        self.epoch_callback = Some(Box::new(callback));
        self
    }
}

fn check_plane_size(data: &Tensor, expected: usize, what: &str) -> NnResult<()> {
    let plane = data.shape().plane().size();
    if plane != expected {
        return Err(NnError::InvalidInput(format!(
            "{what} planes have {plane} elements, the network expects {expected}"
        )));
    }
    Ok(())
}

struct Batches {
    count: u32,
    batch_size: u32,
    last_batch_size: u32,
}

/// Batch count for a dataset, allowing a shorter final batch.
fn batches(cardinality: u32, batch_size: u32) -> Batches {
    let count = cardinality / batch_size + u32::from(cardinality % batch_size != 0);
    Batches {
        count,
        batch_size,
        last_batch_size: cardinality - batch_size * (count - 1),
    }
}

impl Batches {
    fn size_of(&self, batch: u32) -> u32 {
        if batch == self.count - 1 {
            self.last_batch_size
        } else {
            self.batch_size
        }
    }
}

impl Network {
    pub fn train(&mut self, desc: &TrainDesc<'_>) -> NnResult<()> {
        if !self.training_mode {
            return Err(NnError::InvalidInput(
                "cannot train a network that is not in training mode".into(),
            ));
        }
        if desc.epochs == 0 || desc.batch_size == 0 {
            return Err(NnError::InvalidInput(
                "training needs at least one epoch and a nonzero batch size".into(),
            ));
        }

        let in_size = self.input_shape().size();
        let out_size = self.output_shape().size();
        check_plane_size(desc.train_inputs, in_size, "training input")?;
        check_plane_size(desc.train_targets, out_size, "training target")?;
        if desc.train_inputs.shape().depth != desc.train_targets.shape().depth {
            return Err(NnError::InvalidInput(
                "training inputs and targets must have the same cardinality".into(),
            ));
        }

        let test_data = match (desc.test_inputs, desc.test_targets) {
            (Some(inputs), Some(targets)) => {
                check_plane_size(inputs, in_size, "test input")?;
                check_plane_size(targets, out_size, "test target")?;
                if inputs.shape().depth != targets.shape().depth {
                    return Err(NnError::InvalidInput(
                        "test inputs and targets must have the same cardinality".into(),
                    ));
                }
                Some((inputs, targets))
            }
            (None, None) => None,
            _ => {
                return Err(NnError::InvalidInput(
                    "accuracy testing needs both test inputs and test targets".into(),
                ))
            }
        };

        let optim = desc.optim.for_batch(desc.batch_size);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(desc.num_threads.max(1) as usize)
            .build()
            .map_err(|e| NnError::Threading(format!("thread pool: {e}")))?;

        let train_batches = batches(desc.train_inputs.shape().depth, desc.batch_size);

        for epoch in 0..desc.epochs {
            tracing::info!(epoch = epoch + 1, epochs = desc.epochs, "epoch");
            let epoch_start = Instant::now();

            for batch in 0..train_batches.count {
                self.run_train_batch(&pool, desc, &train_batches, batch)?;

                for layer in self.layers.iter_mut() {
                    layer.apply_changes(&optim)?;
                }

                if batch > 0 {
                    let elapsed = epoch_start.elapsed().as_secs_f32();
                    let eta = elapsed / batch as f32 * (train_batches.count - batch) as f32;
                    tracing::debug!(
                        batch = batch + 1,
                        batches = train_batches.count,
                        eta_secs = eta,
                        "batch"
                    );
                }
            }

            if desc.save_interval != 0 && (epoch + 1) % desc.save_interval == 0 {
                let path = format!("{}{:04}.tsn", desc.save_path, epoch + 1);
                self.save(&path)?;
                tracing::info!(path = %path, "checkpoint saved");
            }

            let test_accuracy = match test_data {
                Some((inputs, targets)) => {
                    let accuracy =
                        self.run_accuracy_test(&pool, desc.batch_size, inputs, targets)?;
                    tracing::info!(epoch = epoch + 1, accuracy, "test accuracy");
                    Some(accuracy)
                }
                None => None,
            };

            if let Some(callback) = &desc.epoch_callback {
                callback(&EpochInfo {
                    epoch,
                    test_accuracy,
                });
            }
        }

        Ok(())
    }

    fn run_train_batch(
        &self,
        pool: &rayon::ThreadPool,
        desc: &TrainDesc<'_>,
        train_batches: &Batches,
        batch: u32,
    ) -> NnResult<()> {
        let first_err: Mutex<Option<NnError>> = Mutex::new(None);
        let layers = &self.layers;
        let max_layer_size = self.max_layer_size;
        let input_shape = self.input_shape();

        pool.scope(|s| {
            for i in 0..train_batches.size_of(batch) {
                let index = batch * train_batches.batch_size + i;
                let first_err = &first_err;
                s.spawn(move |_| {
                    let result =
                        train_sample(layers, max_layer_size, input_shape, desc, index);
                    if let Err(e) = result {
                        let mut slot = first_err.lock();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                });
            }
        });

        match first_err.into_inner() {
            Some(e) => {
                tracing::error!(error = %e, tag = e.tag(), "training batch failed");
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn run_accuracy_test(
        &self,
        pool: &rayon::ThreadPool,
        batch_size: u32,
        inputs: &Tensor,
        targets: &Tensor,
    ) -> NnResult<f32> {
        let num_correct: Mutex<u32> = Mutex::new(0);
        let first_err: Mutex<Option<NnError>> = Mutex::new(None);
        let layers = &self.layers;
        let max_layer_size = self.max_layer_size;

        let test_batches = batches(inputs.shape().depth, batch_size);
        for batch in 0..test_batches.count {
            pool.scope(|s| {
                for i in 0..test_batches.size_of(batch) {
                    let index = batch * test_batches.batch_size + i;
                    let num_correct = &num_correct;
                    let first_err = &first_err;
                    s.spawn(move |_| {
                        match test_sample(layers, max_layer_size, inputs, targets, index) {
                            Ok(true) => *num_correct.lock() += 1,
                            Ok(false) => {}
                            Err(e) => {
                                let mut slot = first_err.lock();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                            }
                        }
                    });
                }
            });
        }

        if let Some(e) = first_err.into_inner() {
            tracing::error!(error = %e, tag = e.tag(), "accuracy test failed");
            return Err(e);
        }

        Ok(num_correct.into_inner() as f32 / inputs.shape().depth as f32)
    }
}

/// One worker task: forward, cost gradient, backward for a single sample.
fn train_sample(
    layers: &[Box<dyn Layer>],
    max_layer_size: usize,
    input_shape: Shape,
    desc: &TrainDesc<'_>,
    index: u32,
) -> NnResult<()> {
    scratch::with(|s| -> NnResult<()> {
        let mut in_out = s.take_alloc(input_shape, max_layer_size);
        let mut target = s.take(desc.train_targets.shape().plane());

        let result = (|| -> NnResult<()> {
            in_out.copy_plane_from(desc.train_inputs, index)?;
            in_out.set_shape(input_shape)?;
            target.copy_plane_from(desc.train_targets, index)?;

            if let Some(t) = &desc.transforms {
                let mat = Mat3::compose(
                    rng::rand_range(t.min_translation, t.max_translation),
                    rng::rand_range(t.min_translation, t.max_translation),
                    rng::rand_range(t.min_scale, t.max_scale),
                    rng::rand_range(t.min_scale, t.max_scale),
                    rng::rand_range(t.min_angle, t.max_angle),
                );
                image::transform_ip(&mut in_out, SampleKind::Bilinear, &mat)?;
            }

            let mut cache = LayersCache::new();
            for layer in layers {
                layer.forward(&mut in_out, Some(&mut cache))?;
            }

            desc.cost.grad_ip(&mut in_out, &target)?;

            for layer in layers.iter().rev() {
                layer.backward(&mut in_out, &mut cache)?;
            }

            Ok(())
        })();

        s.put(target);
        s.put(in_out);
        result
    })
}

/// One accuracy-test task: forward, then argmax comparison.
fn test_sample(
    layers: &[Box<dyn Layer>],
    max_layer_size: usize,
    inputs: &Tensor,
    targets: &Tensor,
    index: u32,
) -> NnResult<bool> {
    scratch::with(|s| -> NnResult<bool> {
        let mut in_out = s.take_alloc(inputs.shape().plane(), max_layer_size);
        let mut target = s.take(targets.shape().plane());

        let result = (|| -> NnResult<bool> {
            in_out.copy_plane_from(inputs, index)?;
            target.copy_plane_from(targets, index)?;

            for layer in layers {
                layer.forward(&mut in_out, None)?;
            }

            Ok(in_out.argmax() == target.argmax())
        })();

        s.put(target);
        s.put(in_out);
        result
    })
}
