pub mod list;
pub mod ops;

pub use list::TensorList;

use crate::errors::{NnError, NnResult};
use crate::types::{Shape, TensorIndex};

/// Dense 3D f32 tensor.
///
/// The backing store may be larger than the current shape (`alloc`), which
/// lets working buffers be reshaped between layers without reallocating.
/// Elements are row-major within a plane, planes stacked along depth:
/// `data[x + y*W + z*W*H]`.
#[derive(Clone, Debug)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f32>,
}

impl Tensor {
    /// Zero-filled tensor with capacity equal to its element count.
    pub fn new(shape: Shape) -> NnResult<Self> {
        Self::with_alloc(shape, shape.size())
    }

    /// Zero-filled tensor with a backing store of `alloc` elements.
    pub fn with_alloc(shape: Shape, alloc: usize) -> NnResult<Self> {
        if alloc < shape.size() {
            return Err(NnError::InvalidInput(format!(
                "alloc {} is smaller than shape {} element count",
                alloc, shape
            )));
        }
        Ok(Self {
            shape,
            data: vec![0.0; alloc],
        })
    }

    /// Tensor owning `data`; the vector length is kept as the capacity.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> NnResult<Self> {
        if data.len() < shape.size() {
            return Err(NnError::InvalidInput(format!(
                "data length {} is smaller than shape {} element count",
                data.len(),
                shape
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn from_data(shape: Shape, data: &[f32]) -> NnResult<Self> {
        Self::from_vec(shape, data.to_vec())
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Capacity of the backing store in elements.
    pub fn alloc(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.shape.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reshapes without touching the data. Fails if the backing store is
    /// too small for the new shape.
    pub fn set_shape(&mut self, shape: Shape) -> NnResult<()> {
        if shape.size() > self.data.len() {
            return Err(NnError::AllocSize(format!(
                "cannot reshape to {}: alloc is {} elements",
                shape,
                self.data.len()
            )));
        }
        self.shape = shape;
        Ok(())
    }

    /// Elements covered by the current shape.
    pub fn data(&self) -> &[f32] {
        &self.data[..self.shape.size()]
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        let size = self.shape.size();
        &mut self.data[..size]
    }

    /// Consumes the tensor, yielding its backing store.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn at(&self, x: u32, y: u32, z: u32) -> f32 {
        let w = self.shape.width as usize;
        let h = self.shape.height as usize;
        self.data[x as usize + y as usize * w + z as usize * w * h]
    }

    pub fn fill(&mut self, value: f32) {
        for v in self.data_mut() {
            *v = value;
        }
    }

    /// Copies shape and elements from `src`. The destination keeps its own
    /// (possibly larger) capacity.
    pub fn copy_from(&mut self, src: &Tensor) -> NnResult<()> {
        let size = src.len();
        if self.data.len() < size {
            return Err(NnError::AllocSize(format!(
                "cannot copy tensor of {} elements into alloc of {}",
                size,
                self.data.len()
            )));
        }
        self.shape = src.shape;
        self.data[..size].copy_from_slice(src.data());
        Ok(())
    }

    /// Index of the maximum element; ties resolve to the earliest element
    /// in x, y, z scan order.
    pub fn argmax(&self) -> TensorIndex {
        let mut max_num = f32::MIN;
        let mut max_index = TensorIndex::default();

        let w = self.shape.width as usize;
        let h = self.shape.height as usize;
        for z in 0..self.shape.depth {
            for y in 0..self.shape.height {
                for x in 0..self.shape.width {
                    let v = self.data[x as usize + y as usize * w + z as usize * w * h];
                    if v > max_num {
                        max_num = v;
                        max_index = TensorIndex::new(x, y, z);
                    }
                }
            }
        }

        max_index
    }

    /// True iff every element is exactly 0.0.
    pub fn is_zero(&self) -> bool {
        self.data().iter().all(|&v| v == 0.0)
    }

    /// Borrows depth plane `z` as a `(W, H, 1)` slice without copying.
    pub fn plane(&self, z: u32) -> NnResult<&[f32]> {
        if z >= self.shape.depth {
            return Err(NnError::InvalidInput(format!(
                "plane {} out of range for shape {}",
                z, self.shape
            )));
        }
        let plane_size = self.shape.plane().size();
        let start = z as usize * plane_size;
        Ok(&self.data[start..start + plane_size])
    }

    /// Copies depth plane `z` of `src` into this tensor, reshaping it to
    /// `(W, H, 1)`.
    pub fn copy_plane_from(&mut self, src: &Tensor, z: u32) -> NnResult<()> {
        let plane = src.plane(z)?;
        if self.data.len() < plane.len() {
            return Err(NnError::AllocSize(format!(
                "cannot copy plane of {} elements into alloc of {}",
                plane.len(),
                self.data.len()
            )));
        }
        self.shape = src.shape.plane();
        self.data[..plane.len()].copy_from_slice(plane);
        Ok(())
    }
}
