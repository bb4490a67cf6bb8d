use serde::{Deserialize, Serialize};
use std::fmt;

/// Extents of a tensor: width x height x depth.
///
/// Any zero dimension is normalized to 1 so that 1D and 2D data can be
/// described without padding the constructor call sites.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Shape {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            depth: depth.max(1),
        }
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }

    /// Same extents with depth 1.
    pub fn plane(&self) -> Shape {
        Shape::new(self.width, self.height, 1)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.width, self.height, self.depth)
    }
}

/// Position of a single element inside a tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TensorIndex {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl TensorIndex {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_extents_normalize() {
        let s = Shape::new(3, 0, 0);
        assert_eq!(s, Shape::new(3, 1, 1));
        assert_eq!(s.size(), 3);

        let s = Shape::new(0, 0, 0);
        assert_eq!(s, Shape::new(1, 1, 1));
        assert_eq!(s.size(), 1);
    }

    #[test]
    fn size_is_product() {
        assert_eq!(Shape::new(4, 5, 6).size(), 120);
    }
}
