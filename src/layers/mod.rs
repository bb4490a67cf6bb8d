//! Layer library.
//!
//! A network is an ordered list of boxed [`Layer`] trait objects created
//! from [`LayerDesc`] descriptors. Forward mutates a working tensor in
//! place and may push entries onto a per-sample [`LayersCache`]; backward
//! pops them in reverse and adds parameter gradients into the layer's
//! accumulators, which makes `&self` backward safe across worker threads.

pub mod activation;
pub mod conv2d;
pub mod dense;
pub mod dropout;
pub mod norm;
pub mod pool2d;
pub mod shape_ops;

pub use activation::ActivationKind;
pub use pool2d::PoolKind;

use crate::errors::{NnError, NnResult};
use crate::init::ParamInit;
use crate::optim::Optimizer;
use crate::tensor::{Tensor, TensorList};
use crate::types::Shape;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Input,
    Reshape,
    Flatten,
    Dense,
    Activation,
    Dropout,
    Pooling2d,
    Conv2d,
    Norm,
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Input => "input",
            LayerKind::Reshape => "reshape",
            LayerKind::Flatten => "flatten",
            LayerKind::Dense => "dense",
            LayerKind::Activation => "activation",
            LayerKind::Dropout => "dropout",
            LayerKind::Pooling2d => "pooling_2d",
            LayerKind::Conv2d => "conv_2d",
            LayerKind::Norm => "norm",
        }
    }

    pub fn from_name(name: &str) -> NnResult<Self> {
        match name {
            "input" => Ok(LayerKind::Input),
            "reshape" => Ok(LayerKind::Reshape),
            "flatten" => Ok(LayerKind::Flatten),
            "dense" => Ok(LayerKind::Dense),
            "activation" => Ok(LayerKind::Activation),
            "dropout" => Ok(LayerKind::Dropout),
            "pooling_2d" => Ok(LayerKind::Pooling2d),
            "conv_2d" => Ok(LayerKind::Conv2d),
            "norm" => Ok(LayerKind::Norm),
            _ => Err(NnError::InvalidEnum(format!("unknown layer kind '{name}'"))),
        }
    }
}

/// Fully describes a layer: kind plus kind-specific settings. Sufficient
/// to create the layer and to persist the network topology.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerDesc {
    Input {
        shape: Shape,
    },
    Reshape {
        shape: Shape,
    },
    Flatten,
    Dense {
        size: u32,
        weight_init: ParamInit,
        bias_init: ParamInit,
    },
    Activation {
        func: ActivationKind,
    },
    Dropout {
        keep_rate: f32,
    },
    Pooling2d {
        pool_size: Shape,
        pool: PoolKind,
    },
    Conv2d {
        num_filters: u32,
        kernel_size: u32,
        padding: bool,
        stride: u32,
        kernels_init: ParamInit,
        biases_init: ParamInit,
    },
    Norm {
        epsilon: f32,
    },
}

impl LayerDesc {
    pub fn input(shape: Shape) -> Self {
        LayerDesc::Input { shape }
    }

    pub fn reshape(shape: Shape) -> Self {
        LayerDesc::Reshape { shape }
    }

    pub fn flatten() -> Self {
        LayerDesc::Flatten
    }

    /// Dense layer with default initialization (Xavier uniform weights,
    /// zero biases).
    pub fn dense(size: u32) -> Self {
        LayerDesc::Dense {
            size,
            weight_init: ParamInit::XavierUniform,
            bias_init: ParamInit::Zeros,
        }
    }

    pub fn activation(func: ActivationKind) -> Self {
        LayerDesc::Activation { func }
    }

    pub fn dropout(keep_rate: f32) -> Self {
        LayerDesc::Dropout { keep_rate }
    }

    pub fn pooling_2d(width: u32, height: u32, pool: PoolKind) -> Self {
        LayerDesc::Pooling2d {
            pool_size: Shape::new(width, height, 1),
            pool,
        }
    }

    /// Convolution with default initialization (He normal kernels, zero
    /// biases) and stride 1.
    pub fn conv_2d(num_filters: u32, kernel_size: u32, padding: bool) -> Self {
        LayerDesc::Conv2d {
            num_filters,
            kernel_size,
            padding,
            stride: 1,
            kernels_init: ParamInit::HeNormal,
            biases_init: ParamInit::Zeros,
        }
    }

    pub fn norm() -> Self {
        LayerDesc::Norm { epsilon: 1e-8 }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            LayerDesc::Input { .. } => LayerKind::Input,
            LayerDesc::Reshape { .. } => LayerKind::Reshape,
            LayerDesc::Flatten => LayerKind::Flatten,
            LayerDesc::Dense { .. } => LayerKind::Dense,
            LayerDesc::Activation { .. } => LayerKind::Activation,
            LayerDesc::Dropout { .. } => LayerKind::Dropout,
            LayerDesc::Pooling2d { .. } => LayerKind::Pooling2d,
            LayerDesc::Conv2d { .. } => LayerKind::Conv2d,
            LayerDesc::Norm { .. } => LayerKind::Norm,
        }
    }
}

/// Per-sample LIFO of tensors pushed by forward and popped in reverse by
/// backward. Balanced by construction: a full forward/backward pass leaves
/// it empty.
#[derive(Debug, Default)]
pub struct LayersCache {
    stack: Vec<Tensor>,
}

impl LayersCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, t: Tensor) {
        self.stack.push(t);
    }

    pub fn pop(&mut self) -> NnResult<Tensor> {
        self.stack
            .pop()
            .ok_or_else(|| NnError::General("layers cache underflow".into()))
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// The layer vtable. Entries a layer does not need fall through to the
/// default no-ops.
pub trait Layer: Send + Sync {
    fn kind(&self) -> LayerKind;

    /// Output shape, fixed at creation from the descriptor and the
    /// previous layer's shape.
    fn out_shape(&self) -> Shape;

    /// Transforms `in_out` in place. `cache` is present during training
    /// passes and absent during inference.
    fn forward(&self, in_out: &mut Tensor, cache: Option<&mut LayersCache>) -> NnResult<()>;

    /// Updates `delta` in place, popping whatever forward cached and
    /// adding parameter gradients into the layer's accumulators.
    fn backward(&self, _delta: &mut Tensor, _cache: &mut LayersCache) -> NnResult<()> {
        Ok(())
    }

    /// Applies accumulated parameter changes through the optimizer.
    fn apply_changes(&mut self, _optim: &Optimizer) -> NnResult<()> {
        Ok(())
    }

    /// Zeroes gradient accumulators without stepping parameters.
    fn clear_changes(&self) {}

    /// Pushes trainable parameters onto `list`, named by layer index.
    fn save_params(&self, _list: &mut TensorList, _index: usize) -> NnResult<()> {
        Ok(())
    }

    /// Loads trainable parameters from `list` by layer index.
    fn load_params(&mut self, _list: &TensorList, _index: usize) -> NnResult<()> {
        Ok(())
    }
}

/// Creates a layer from its descriptor and the previous layer's shape.
pub fn create(desc: &LayerDesc, prev_shape: Shape, training: bool) -> NnResult<Box<dyn Layer>> {
    match desc {
        LayerDesc::Input { shape } => Ok(Box::new(shape_ops::InputLayer::new(*shape)?)),
        LayerDesc::Reshape { shape } => {
            Ok(Box::new(shape_ops::ReshapeLayer::new(*shape, prev_shape)?))
        }
        LayerDesc::Flatten => Ok(Box::new(shape_ops::FlattenLayer::new(prev_shape))),
        LayerDesc::Dense {
            size,
            weight_init,
            bias_init,
        } => Ok(Box::new(dense::DenseLayer::new(
            *size,
            *weight_init,
            *bias_init,
            prev_shape,
            training,
        )?)),
        LayerDesc::Activation { func } => {
            Ok(Box::new(activation::ActivationLayer::new(*func, prev_shape)))
        }
        LayerDesc::Dropout { keep_rate } => Ok(Box::new(dropout::DropoutLayer::new(
            *keep_rate, prev_shape, training,
        )?)),
        LayerDesc::Pooling2d { pool_size, pool } => Ok(Box::new(pool2d::Pooling2dLayer::new(
            *pool_size, *pool, prev_shape,
        )?)),
        LayerDesc::Conv2d {
            num_filters,
            kernel_size,
            padding,
            stride,
            kernels_init,
            biases_init,
        } => Ok(Box::new(conv2d::Conv2dLayer::new(
            *num_filters,
            *kernel_size,
            *padding,
            *stride,
            *kernels_init,
            *biases_init,
            prev_shape,
            training,
        )?)),
        LayerDesc::Norm { epsilon } => Ok(Box::new(norm::NormLayer::new(*epsilon, prev_shape))),
    }
}
