//! Parameter-change accumulation and optimizers.
//!
//! Workers sum raw per-sample gradients into a [`ParamChange`] under its
//! lock; at the batch barrier the optimizer averages the sum over the
//! batch, updates its moment state, steps the parameter, and clears the
//! accumulator. Moment tensors `V` and `S` persist across batches.

use crate::errors::NnResult;
use crate::scratch;
use crate::tensor::Tensor;
use crate::types::Shape;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd { momentum: f32 },
    RmsProp { beta: f32, epsilon: f32 },
    Adam { beta1: f32, beta2: f32, epsilon: f32 },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Optimizer {
    pub learning_rate: f32,
    pub kind: OptimizerKind,
    #[serde(skip, default = "default_batch_size")]
    batch_size: u32,
}

fn default_batch_size() -> u32 {
    1
}

impl Optimizer {
    pub fn sgd(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            kind: OptimizerKind::Sgd { momentum },
            batch_size: 1,
        }
    }

    pub fn rms_prop(learning_rate: f32, beta: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            kind: OptimizerKind::RmsProp { beta, epsilon },
            batch_size: 1,
        }
    }

    pub fn adam(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            kind: OptimizerKind::Adam {
                beta1,
                beta2,
                epsilon,
            },
            batch_size: 1,
        }
    }

    /// Copy of this optimizer configured for a batch size. The trainer sets
    /// this; callers do not need to.
    pub fn for_batch(&self, batch_size: u32) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..*self
        }
    }
}

struct ChangeState {
    change: Tensor,
    v: Tensor,
    s: Tensor,
}

/// Mutex-protected gradient accumulator with per-parameter moment state.
pub struct ParamChange {
    state: Mutex<ChangeState>,
}

impl ParamChange {
    pub fn new(shape: Shape) -> NnResult<Self> {
        Ok(Self {
            state: Mutex::new(ChangeState {
                change: Tensor::new(shape)?,
                v: Tensor::new(shape)?,
                s: Tensor::new(shape)?,
            }),
        })
    }

    /// Adds a per-sample gradient under the lock. The critical section is
    /// just the tensor add.
    pub fn add(&self, addend: &Tensor) -> NnResult<()> {
        let mut state = self.state.lock();
        state.change.add_ip(addend)
    }

    /// Zeroes the accumulator without touching moment state.
    pub fn clear(&self) {
        self.state.lock().change.fill(0.0);
    }

    /// Applies the accumulated change to `param` and clears the
    /// accumulator. Called once per batch, after all workers finish.
    pub fn apply(&self, optim: &Optimizer, param: &mut Tensor) -> NnResult<()> {
        let state = &mut *self.state.lock();

        // Workers add raw sums; averaging over the batch happens here.
        state
            .change
            .scale_ip(1.0 / optim.batch_size as f32);

        match optim.kind {
            OptimizerKind::Sgd { momentum } => {
                // V = beta * V + (1 - beta) * G
                state.v.scale_ip(momentum);
                state.change.scale_ip(1.0 - momentum);
                state.v.add_ip(&state.change)?;

                // param -= lr * V
                state.change.copy_from(&state.v)?;
                state.change.scale_ip(optim.learning_rate);
                param.sub_ip(&state.change)?;
            }
            OptimizerKind::RmsProp { beta, epsilon } => {
                scratch::with(|sc| -> NnResult<()> {
                    let mut grad = sc.take(state.change.shape());
                    grad.copy_from(&state.change)?;

                    if state.s.is_zero() {
                        // First step seeds S with G^2 instead of decaying
                        // from zero.
                        state.change.square_ip();
                        state.s.copy_from(&state.change)?;
                    } else {
                        // S = beta * S + (1 - beta) * G^2
                        state.s.scale_ip(beta);
                        state.change.square_ip();
                        state.change.scale_ip(1.0 - beta);
                        state.s.add_ip(&state.change)?;
                    }

                    // param -= lr * G / sqrt(S + eps)
                    let mut sqrt_s = sc.take(state.s.shape());
                    sqrt_s.copy_from(&state.s)?;
                    sqrt_s.add_scalar_ip(epsilon);
                    sqrt_s.sqrt_ip();

                    grad.div_ip(&sqrt_s)?;
                    grad.scale_ip(optim.learning_rate);
                    param.sub_ip(&grad)?;

                    sc.put(sqrt_s);
                    sc.put(grad);
                    Ok(())
                })?;
            }
            OptimizerKind::Adam {
                beta1,
                beta2,
                epsilon,
            } => {
                scratch::with(|sc| -> NnResult<()> {
                    let mut grad = sc.take(state.change.shape());
                    grad.copy_from(&state.change)?;

                    // V = beta1 * V + (1 - beta1) * G
                    state.v.scale_ip(beta1);
                    state.change.scale_ip(1.0 - beta1);
                    state.v.add_ip(&state.change)?;

                    // S = beta2 * S + (1 - beta2) * G^2
                    state.change.copy_from(&grad)?;
                    state.s.scale_ip(beta2);
                    state.change.square_ip();
                    state.change.scale_ip(1.0 - beta2);
                    state.s.add_ip(&state.change)?;

                    // param -= lr * V / sqrt(S + eps)
                    // No bias correction; moments warm up from zero.
                    let mut sqrt_s = sc.take(state.s.shape());
                    sqrt_s.copy_from(&state.s)?;
                    sqrt_s.add_scalar_ip(epsilon);
                    sqrt_s.sqrt_ip();

                    grad.copy_from(&state.v)?;
                    grad.div_ip(&sqrt_s)?;
                    grad.scale_ip(optim.learning_rate);
                    param.sub_ip(&grad)?;

                    sc.put(sqrt_s);
                    sc.put(grad);
                    Ok(())
                })?;
            }
        }

        state.change.fill(0.0);
        Ok(())
    }
}
