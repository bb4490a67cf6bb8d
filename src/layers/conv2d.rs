//! 2D convolution, computed as a single matrix multiply over im2col
//! columns so the dot kernel stays the hot loop.

use super::{Layer, LayerKind, LayersCache};
use crate::errors::{NnError, NnResult};
use crate::init::ParamInit;
use crate::optim::{Optimizer, ParamChange};
use crate::scratch;
use crate::tensor::{ops::conv_out_shape, Tensor, TensorList};
use crate::types::Shape;

pub struct Conv2dLayer {
    kernel_size: u32,
    stride: u32,
    padding: u32,
    in_shape: Shape,
    shape: Shape,
    /// `(K*K*in_depth, num_filters, 1)`; one flattened kernel per row.
    kernels: Tensor,
    /// Shaped like the output.
    biases: Tensor,
    kernels_change: Option<ParamChange>,
    biases_change: Option<ParamChange>,
}

impl Conv2dLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        num_filters: u32,
        kernel_size: u32,
        padding: bool,
        stride: u32,
        kernels_init: ParamInit,
        biases_init: ParamInit,
        prev_shape: Shape,
        training: bool,
    ) -> NnResult<Self> {
        if num_filters == 0 || kernel_size == 0 {
            return Err(NnError::Create(
                "convolution needs at least one filter and a nonzero kernel".into(),
            ));
        }

        // Same-size output at stride 1 when padding is requested.
        let padding = if padding { (kernel_size - 1) / 2 } else { 0 };

        let padded = Shape::new(
            prev_shape.width + padding * 2,
            prev_shape.height + padding * 2,
            prev_shape.depth,
        );
        let mut shape = conv_out_shape(
            padded,
            Shape::new(kernel_size, kernel_size, 1),
            stride,
            stride,
        )?;
        shape.depth = num_filters;

        let kernels_shape = Shape::new(
            kernel_size * kernel_size * prev_shape.depth,
            num_filters,
            1,
        );

        let mut kernels = Tensor::new(kernels_shape)?;
        let mut biases = Tensor::new(shape)?;
        kernels_init.apply(&mut kernels, prev_shape.size(), shape.size())?;
        biases_init.apply(&mut biases, prev_shape.size(), shape.size())?;

        let (kernels_change, biases_change) = if training {
            (
                Some(ParamChange::new(kernels_shape)?),
                Some(ParamChange::new(shape)?),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            kernel_size,
            stride,
            padding,
            in_shape: prev_shape,
            shape,
            kernels,
            biases,
            kernels_change,
            biases_change,
        })
    }

    fn cols_shape(&self) -> Shape {
        let x_kernels = (self.in_shape.width + self.padding * 2 - self.kernel_size) / self.stride + 1;
        let y_kernels =
            (self.in_shape.height + self.padding * 2 - self.kernel_size) / self.stride + 1;
        Shape::new(
            x_kernels * y_kernels,
            self.in_shape.depth * self.kernel_size * self.kernel_size,
            1,
        )
    }

    fn forward_with_cols(&self, in_out: &mut Tensor, cols: &Tensor) -> NnResult<()> {
        Tensor::dot_into(in_out, false, false, &self.kernels, cols)?;
        in_out.set_shape(self.shape)?;
        in_out.add_ip(&self.biases)
    }
}

impl Layer for Conv2dLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Conv2d
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, in_out: &mut Tensor, cache: Option<&mut LayersCache>) -> NnResult<()> {
        match cache {
            Some(cache) => {
                // Backward needs the columns; they live in the cache.
                let mut cols = Tensor::new(self.cols_shape())?;
                Tensor::im2col_into(&mut cols, in_out, self.kernel_size, self.stride, self.padding)?;
                self.forward_with_cols(in_out, &cols)?;
                cache.push(cols);
                Ok(())
            }
            None => scratch::with(|s| -> NnResult<()> {
                let mut cols = s.take(self.cols_shape());
                let result = Tensor::im2col_into(
                    &mut cols,
                    in_out,
                    self.kernel_size,
                    self.stride,
                    self.padding,
                )
                .and_then(|_| self.forward_with_cols(in_out, &cols));
                s.put(cols);
                result
            }),
        }
    }

    fn backward(&self, delta: &mut Tensor, cache: &mut LayersCache) -> NnResult<()> {
        if let Some(change) = &self.biases_change {
            change.add(delta)?;
        }

        let cols = cache.pop()?;

        // Flatten the spatial dims so delta reads as one row per filter.
        let delta_view = Shape::new(self.shape.width * self.shape.height, self.shape.depth, 1);
        delta.set_shape(delta_view)?;

        scratch::with(|s| -> NnResult<()> {
            // kernel change accumulates delta . cols^T
            if let Some(change) = &self.kernels_change {
                let mut grad = s.take(self.kernels.shape());
                let result = Tensor::dot_into(&mut grad, false, true, delta, &cols)
                    .and_then(|_| change.add(&grad));
                s.put(grad);
                result?;
            }

            // delta = kernels^T . delta, carried back to image layout
            let mut delta_cols = s.take(cols.shape());
            let result = Tensor::dot_into(&mut delta_cols, true, false, &self.kernels, delta)
                .and_then(|_| {
                    Tensor::col2im_into(
                        delta,
                        &delta_cols,
                        self.in_shape,
                        self.kernel_size,
                        self.stride,
                        self.padding,
                    )
                });
            s.put(delta_cols);
            result
        })
    }

    fn apply_changes(&mut self, optim: &Optimizer) -> NnResult<()> {
        if let Some(change) = &self.kernels_change {
            change.apply(optim, &mut self.kernels)?;
        }
        if let Some(change) = &self.biases_change {
            change.apply(optim, &mut self.biases)?;
        }
        Ok(())
    }

    fn clear_changes(&self) {
        if let Some(change) = &self.kernels_change {
            change.clear();
        }
        if let Some(change) = &self.biases_change {
            change.clear();
        }
    }

    fn save_params(&self, list: &mut TensorList, index: usize) -> NnResult<()> {
        list.push(format!("conv_2d_kernels_{index}"), self.kernels.clone());
        list.push(format!("conv_2d_biases_{index}"), self.biases.clone());
        Ok(())
    }

    fn load_params(&mut self, list: &TensorList, index: usize) -> NnResult<()> {
        let kernels = list
            .get(&format!("conv_2d_kernels_{index}"))
            .ok_or_else(|| {
                NnError::Parse(format!("missing tensor 'conv_2d_kernels_{index}'"))
            })?;
        let biases = list
            .get(&format!("conv_2d_biases_{index}"))
            .ok_or_else(|| {
                NnError::Parse(format!("missing tensor 'conv_2d_biases_{index}'"))
            })?;

        if kernels.shape() != self.kernels.shape() || biases.shape() != self.biases.shape() {
            return Err(NnError::BadShape(format!(
                "saved convolution parameters do not match layer {index}"
            )));
        }

        self.kernels.copy_from(kernels)?;
        self.biases.copy_from(biases)
    }
}
