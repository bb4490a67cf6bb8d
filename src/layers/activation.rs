//! Activation layer.
//!
//! Per-kind cache requirements: relu and leaky relu differentiate on the
//! sign of the pre-activation, so they cache the input; sigmoid, tanh, and
//! softmax have analytic gradients in terms of the output, so they cache
//! the output; linear caches nothing.

use super::{Layer, LayerKind, LayersCache};
use crate::errors::{NnError, NnResult};
use crate::scratch;
use crate::tensor::Tensor;
use crate::types::Shape;
use serde::{Deserialize, Serialize};

const LEAKY_SLOPE: f32 = 0.01;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Linear,
    Sigmoid,
    Tanh,
    Relu,
    LeakyRelu,
    Softmax,
}

impl ActivationKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActivationKind::Linear => "linear",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Relu => "relu",
            ActivationKind::LeakyRelu => "leaky_relu",
            ActivationKind::Softmax => "softmax",
        }
    }

    pub fn from_name(name: &str) -> NnResult<Self> {
        match name {
            "linear" => Ok(ActivationKind::Linear),
            "sigmoid" => Ok(ActivationKind::Sigmoid),
            "tanh" => Ok(ActivationKind::Tanh),
            "relu" => Ok(ActivationKind::Relu),
            "leaky_relu" => Ok(ActivationKind::LeakyRelu),
            "softmax" => Ok(ActivationKind::Softmax),
            _ => Err(NnError::InvalidEnum(format!(
                "unknown activation '{name}'"
            ))),
        }
    }

    fn caches_input(&self) -> bool {
        matches!(self, ActivationKind::Relu | ActivationKind::LeakyRelu)
    }

    fn caches_output(&self) -> bool {
        matches!(
            self,
            ActivationKind::Sigmoid | ActivationKind::Tanh | ActivationKind::Softmax
        )
    }

    fn apply(&self, t: &mut Tensor) {
        match self {
            ActivationKind::Linear => {}
            ActivationKind::Sigmoid => {
                for v in t.data_mut() {
                    *v = 1.0 / (1.0 + (-*v).exp());
                }
            }
            ActivationKind::Tanh => {
                for v in t.data_mut() {
                    *v = v.tanh();
                }
            }
            ActivationKind::Relu => {
                for v in t.data_mut() {
                    if *v < 0.0 {
                        *v = 0.0;
                    }
                }
            }
            ActivationKind::LeakyRelu => {
                for v in t.data_mut() {
                    if *v < 0.0 {
                        *v *= LEAKY_SLOPE;
                    }
                }
            }
            ActivationKind::Softmax => {
                let data = t.data_mut();

                // Max subtraction keeps the exponentials finite.
                let mut max = data[0];
                for &v in data.iter() {
                    if v > max {
                        max = v;
                    }
                }

                let mut exp_sum = 0.0;
                for v in data.iter_mut() {
                    *v = (*v - max).exp();
                    exp_sum += *v;
                }

                let inv = 1.0 / exp_sum;
                for v in data.iter_mut() {
                    *v *= inv;
                }
            }
        }
    }
}

pub struct ActivationLayer {
    func: ActivationKind,
    shape: Shape,
}

impl ActivationLayer {
    pub fn new(func: ActivationKind, prev_shape: Shape) -> Self {
        Self {
            func,
            shape: prev_shape,
        }
    }

    pub fn func(&self) -> ActivationKind {
        self.func
    }
}

impl Layer for ActivationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Activation
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, in_out: &mut Tensor, cache: Option<&mut LayersCache>) -> NnResult<()> {
        match cache {
            Some(cache) => {
                if self.func.caches_input() {
                    let mut input = Tensor::new(in_out.shape())?;
                    input.copy_from(in_out)?;
                    cache.push(input);
                }

                self.func.apply(in_out);

                if self.func.caches_output() {
                    let mut output = Tensor::new(in_out.shape())?;
                    output.copy_from(in_out)?;
                    cache.push(output);
                }
            }
            None => self.func.apply(in_out),
        }
        Ok(())
    }

    fn backward(&self, delta: &mut Tensor, cache: &mut LayersCache) -> NnResult<()> {
        let prev_output = if self.func.caches_output() {
            Some(cache.pop()?)
        } else {
            None
        };
        let prev_input = if self.func.caches_input() {
            Some(cache.pop()?)
        } else {
            None
        };

        match self.func {
            ActivationKind::Linear => {}
            ActivationKind::Sigmoid => {
                let mut grad = prev_output.expect("sigmoid caches output");
                for v in grad.data_mut() {
                    *v *= 1.0 - *v;
                }
                delta.mul_ip(&grad)?;
            }
            ActivationKind::Tanh => {
                let mut grad = prev_output.expect("tanh caches output");
                for v in grad.data_mut() {
                    *v = 1.0 - *v * *v;
                }
                delta.mul_ip(&grad)?;
            }
            ActivationKind::Relu => {
                let mut grad = prev_input.expect("relu caches input");
                for v in grad.data_mut() {
                    *v = if *v > 0.0 { 1.0 } else { 0.0 };
                }
                delta.mul_ip(&grad)?;
            }
            ActivationKind::LeakyRelu => {
                let mut grad = prev_input.expect("leaky relu caches input");
                for v in grad.data_mut() {
                    *v = if *v > 0.0 { 1.0 } else { LEAKY_SLOPE };
                }
                delta.mul_ip(&grad)?;
            }
            ActivationKind::Softmax => {
                let out = prev_output.expect("softmax caches output");
                let w = out.len() as u32;

                // delta = delta . J with J_ij = a_i * (d_ij - a_j)
                let mut jacobian = scratch::with(|s| s.take(Shape::new(w, w, 1)));
                {
                    let a = out.data();
                    let j = jacobian.data_mut();
                    for y in 0..w as usize {
                        for x in 0..w as usize {
                            let kronecker = if x == y { 1.0 } else { 0.0 };
                            j[x + y * w as usize] = a[x] * (kronecker - a[y]);
                        }
                    }
                }
                let result = delta.dot_assign(false, &jacobian);
                scratch::with(|s| s.put(jacobian));
                result?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_is_stable_for_large_inputs() {
        let mut t = Tensor::from_data(Shape::new(3, 1, 1), &[1000.0, 1000.0, 1000.0]).unwrap();
        ActivationKind::Softmax.apply(&mut t);

        let sum: f32 = t.data().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        for &v in t.data() {
            assert!((v - 1.0 / 3.0).abs() < 1e-6);
            assert!(v.is_finite());
        }
    }

    #[test]
    fn relu_gradient_masks_by_input_sign() {
        let layer = ActivationLayer::new(ActivationKind::Relu, Shape::new(3, 1, 1));
        let mut cache = LayersCache::new();

        let mut x = Tensor::from_data(Shape::new(3, 1, 1), &[-1.0, 0.5, 2.0]).unwrap();
        layer.forward(&mut x, Some(&mut cache)).unwrap();
        assert_eq!(x.data(), &[0.0, 0.5, 2.0]);

        let mut delta = Tensor::from_data(Shape::new(3, 1, 1), &[1.0, 1.0, 1.0]).unwrap();
        layer.backward(&mut delta, &mut cache).unwrap();
        assert_eq!(delta.data(), &[0.0, 1.0, 1.0]);
        assert!(cache.is_empty());
    }

    #[test]
    fn softmax_backward_balances_cache() {
        let layer = ActivationLayer::new(ActivationKind::Softmax, Shape::new(4, 1, 1));
        let mut cache = LayersCache::new();

        let mut x =
            Tensor::from_data(Shape::new(4, 1, 1), &[0.1, 0.2, 0.3, 0.4]).unwrap();
        layer.forward(&mut x, Some(&mut cache)).unwrap();
        assert_eq!(cache.len(), 1);

        let mut delta = Tensor::from_data(Shape::new(4, 1, 1), &[1.0, 0.0, 0.0, 0.0]).unwrap();
        layer.backward(&mut delta, &mut cache).unwrap();
        assert!(cache.is_empty());
        assert_eq!(delta.shape(), Shape::new(4, 1, 1));
    }
}
