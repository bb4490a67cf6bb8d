//! Inverted dropout.

use super::{Layer, LayerKind, LayersCache};
use crate::errors::{NnError, NnResult};
use crate::rng;
use crate::tensor::Tensor;
use crate::types::Shape;

pub struct DropoutLayer {
    keep_rate: f32,
    shape: Shape,
    training: bool,
}

impl DropoutLayer {
    pub fn new(keep_rate: f32, prev_shape: Shape, training: bool) -> NnResult<Self> {
        if !(keep_rate > 0.0 && keep_rate <= 1.0) {
            return Err(NnError::InvalidInput(format!(
                "dropout keep rate must be in (0, 1], got {keep_rate}"
            )));
        }
        Ok(Self {
            keep_rate,
            shape: prev_shape,
            training,
        })
    }
}

impl Layer for DropoutLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Dropout
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, in_out: &mut Tensor, cache: Option<&mut LayersCache>) -> NnResult<()> {
        // Identity outside of training passes.
        let cache = match cache {
            Some(cache) if self.training => cache,
            _ => return Ok(()),
        };

        let mut mask = Tensor::new(in_out.shape())?;
        for v in mask.data_mut() {
            *v = if rng::rand_f32() > self.keep_rate {
                0.0
            } else {
                1.0
            };
        }

        // Kept activations are scaled up so inference needs no rescale.
        in_out.mul_ip(&mask)?;
        in_out.scale_ip(1.0 / self.keep_rate);

        cache.push(mask);
        Ok(())
    }

    fn backward(&self, delta: &mut Tensor, cache: &mut LayersCache) -> NnResult<()> {
        let mask = cache.pop()?;
        delta.mul_ip(&mask)?;
        delta.scale_ip(1.0 / self.keep_rate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_is_identity() {
        let layer = DropoutLayer::new(0.5, Shape::new(4, 1, 1), false).unwrap();
        let mut x = Tensor::from_data(Shape::new(4, 1, 1), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        layer.forward(&mut x, None).unwrap();
        assert_eq!(x.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn mask_routes_gradient_to_kept_units() {
        rng::reseed(3);
        let layer = DropoutLayer::new(0.6, Shape::new(64, 1, 1), true).unwrap();
        let mut cache = LayersCache::new();

        let mut x = Tensor::new(Shape::new(64, 1, 1)).unwrap();
        x.fill(1.0);
        layer.forward(&mut x, Some(&mut cache)).unwrap();

        let forward_out: Vec<f32> = x.data().to_vec();

        let mut delta = Tensor::new(Shape::new(64, 1, 1)).unwrap();
        delta.fill(1.0);
        layer.backward(&mut delta, &mut cache).unwrap();

        // Same units that survived forward carry gradient, same scaling.
        assert_eq!(delta.data(), forward_out.as_slice());
        assert!(cache.is_empty());
    }

    #[test]
    fn bad_keep_rate_is_rejected() {
        assert!(DropoutLayer::new(0.0, Shape::new(1, 1, 1), true).is_err());
        assert!(DropoutLayer::new(1.5, Shape::new(1, 1, 1), true).is_err());
    }
}
