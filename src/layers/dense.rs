//! Fully connected layer.

use super::{Layer, LayerKind, LayersCache};
use crate::errors::{NnError, NnResult};
use crate::init::ParamInit;
use crate::optim::{Optimizer, ParamChange};
use crate::scratch;
use crate::tensor::{Tensor, TensorList};
use crate::types::Shape;

pub struct DenseLayer {
    shape: Shape,
    /// `(out, in, 1)`.
    weight: Tensor,
    /// `(out, 1, 1)`.
    bias: Tensor,
    weight_change: Option<ParamChange>,
    bias_change: Option<ParamChange>,
}

impl DenseLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        size: u32,
        weight_init: ParamInit,
        bias_init: ParamInit,
        prev_shape: Shape,
        training: bool,
    ) -> NnResult<Self> {
        if size == 0 {
            return Err(NnError::Create("dense layer size cannot be zero".into()));
        }

        let in_size = prev_shape.width;
        let bias_shape = Shape::new(size, 1, 1);
        let weight_shape = Shape::new(size, in_size, 1);

        let mut weight = Tensor::new(weight_shape)?;
        let mut bias = Tensor::new(bias_shape)?;
        weight_init.apply(&mut weight, in_size as usize, size as usize)?;
        bias_init.apply(&mut bias, in_size as usize, size as usize)?;

        let (weight_change, bias_change) = if training {
            (
                Some(ParamChange::new(weight_shape)?),
                Some(ParamChange::new(bias_shape)?),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            shape: bias_shape,
            weight,
            bias,
            weight_change,
            bias_change,
        })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }
}

impl Layer for DenseLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Dense
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, in_out: &mut Tensor, cache: Option<&mut LayersCache>) -> NnResult<()> {
        if let Some(cache) = cache {
            let mut input = Tensor::new(in_out.shape())?;
            input.copy_from(in_out)?;
            cache.push(input);
        }

        // out = in . W + b
        in_out.dot_assign(false, &self.weight)?;
        in_out.add_ip(&self.bias)
    }

    fn backward(&self, delta: &mut Tensor, cache: &mut LayersCache) -> NnResult<()> {
        if let Some(change) = &self.bias_change {
            change.add(delta)?;
        }

        let prev_input = cache.pop()?;

        // weight change accumulates in^T . delta
        if let Some(change) = &self.weight_change {
            scratch::with(|s| -> NnResult<()> {
                let mut grad = s.take(self.weight.shape());
                let result = Tensor::dot_into(&mut grad, true, false, &prev_input, delta)
                    .and_then(|_| change.add(&grad));
                s.put(grad);
                result
            })?;
        }

        // delta = delta . W^T
        delta.dot_assign(true, &self.weight)
    }

    fn apply_changes(&mut self, optim: &Optimizer) -> NnResult<()> {
        if let Some(change) = &self.weight_change {
            change.apply(optim, &mut self.weight)?;
        }
        if let Some(change) = &self.bias_change {
            change.apply(optim, &mut self.bias)?;
        }
        Ok(())
    }

    fn clear_changes(&self) {
        if let Some(change) = &self.weight_change {
            change.clear();
        }
        if let Some(change) = &self.bias_change {
            change.clear();
        }
    }

    fn save_params(&self, list: &mut TensorList, index: usize) -> NnResult<()> {
        list.push(format!("dense_weight_{index}"), self.weight.clone());
        list.push(format!("dense_bias_{index}"), self.bias.clone());
        Ok(())
    }

    fn load_params(&mut self, list: &TensorList, index: usize) -> NnResult<()> {
        let weight = named(list, &format!("dense_weight_{index}"))?;
        let bias = named(list, &format!("dense_bias_{index}"))?;

        if weight.shape() != self.weight.shape() || bias.shape() != self.bias.shape() {
            return Err(NnError::BadShape(format!(
                "saved dense parameters do not match layer {index}"
            )));
        }

        self.weight.copy_from(weight)?;
        self.bias.copy_from(bias)
    }
}

fn named<'a>(list: &'a TensorList, name: &str) -> NnResult<&'a Tensor> {
    list.get(name)
        .ok_or_else(|| NnError::Parse(format!("missing tensor '{name}' in parameter list")))
}
