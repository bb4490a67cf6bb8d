//! Input, reshape, and flatten layers. None of them own parameters; they
//! only move shape metadata around.

use super::{Layer, LayerKind, LayersCache};
use crate::errors::{NnError, NnResult};
use crate::tensor::Tensor;
use crate::types::Shape;

/// Must be the first layer of every network. Reshapes the incoming sample
/// to the declared input shape; the element count is validated when the
/// network is constructed.
pub struct InputLayer {
    shape: Shape,
}

impl InputLayer {
    pub fn new(shape: Shape) -> NnResult<Self> {
        if shape.size() == 0 {
            return Err(NnError::Create("input layer shape is empty".into()));
        }
        Ok(Self { shape })
    }
}

impl Layer for InputLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Input
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, in_out: &mut Tensor, _cache: Option<&mut LayersCache>) -> NnResult<()> {
        if in_out.len() != self.shape.size() {
            return Err(NnError::BadShape(format!(
                "input of {} elements does not fit input layer {}",
                in_out.len(),
                self.shape
            )));
        }
        in_out.set_shape(self.shape)
    }
}

/// Reshapes forward, restores the previous shape on the gradient.
pub struct ReshapeLayer {
    shape: Shape,
    prev_shape: Shape,
}

impl ReshapeLayer {
    pub fn new(shape: Shape, prev_shape: Shape) -> NnResult<Self> {
        if shape.size() != prev_shape.size() {
            return Err(NnError::BadShape(format!(
                "cannot reshape {} to {}: element counts differ",
                prev_shape, shape
            )));
        }
        Ok(Self { shape, prev_shape })
    }
}

impl Layer for ReshapeLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Reshape
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, in_out: &mut Tensor, _cache: Option<&mut LayersCache>) -> NnResult<()> {
        in_out.set_shape(self.shape)
    }

    fn backward(&self, delta: &mut Tensor, _cache: &mut LayersCache) -> NnResult<()> {
        delta.set_shape(self.prev_shape)
    }
}

/// Reshape to 1D.
pub struct FlattenLayer {
    shape: Shape,
    prev_shape: Shape,
}

impl FlattenLayer {
    pub fn new(prev_shape: Shape) -> Self {
        Self {
            shape: Shape::new(prev_shape.size() as u32, 1, 1),
            prev_shape,
        }
    }
}

impl Layer for FlattenLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Flatten
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, in_out: &mut Tensor, _cache: Option<&mut LayersCache>) -> NnResult<()> {
        in_out.set_shape(self.shape)
    }

    fn backward(&self, delta: &mut Tensor, _cache: &mut LayersCache) -> NnResult<()> {
        delta.set_shape(self.prev_shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_round_trips_shape() {
        let layer = FlattenLayer::new(Shape::new(4, 4, 2));
        let mut t = Tensor::new(Shape::new(4, 4, 2)).unwrap();

        layer.forward(&mut t, None).unwrap();
        assert_eq!(t.shape(), Shape::new(32, 1, 1));

        let mut cache = LayersCache::new();
        layer.backward(&mut t, &mut cache).unwrap();
        assert_eq!(t.shape(), Shape::new(4, 4, 2));
    }

    #[test]
    fn reshape_requires_matching_element_count() {
        assert!(ReshapeLayer::new(Shape::new(5, 1, 1), Shape::new(2, 2, 1)).is_err());
        assert!(ReshapeLayer::new(Shape::new(4, 1, 1), Shape::new(2, 2, 1)).is_ok());
    }
}
