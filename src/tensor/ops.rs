//! Tensor kernels: matrix multiply, transpose, im2col/col2im, and the
//! element-wise family. Every kernel has an in-place variant writing into a
//! caller-supplied destination (with a capacity check) and an allocating
//! variant returning a fresh tensor.

use super::Tensor;
use crate::errors::{NnError, NnResult};
use crate::scratch;
use crate::types::Shape;
use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewMut2};

/// Output extents of a valid convolution of `kernel` over `input`.
pub fn conv_out_shape(input: Shape, kernel: Shape, stride_x: u32, stride_y: u32) -> NnResult<Shape> {
    if stride_x == 0 || stride_y == 0 {
        return Err(NnError::InvalidInput(
            "convolution stride cannot be zero".into(),
        ));
    }
    if kernel.width > input.width || kernel.height > input.height {
        return Err(NnError::BadShape(format!(
            "kernel {} does not fit in input {}",
            kernel, input
        )));
    }
    Ok(Shape::new(
        (input.width - kernel.width) / stride_x + 1,
        (input.height - kernel.height) / stride_y + 1,
        1,
    ))
}

fn view2(t: &Tensor) -> NnResult<ArrayView2<'_, f32>> {
    ArrayView2::from_shape(
        (t.shape().height as usize, t.shape().width as usize),
        t.data(),
    )
    .map_err(|e| NnError::BadShape(format!("2d view: {e}")))
}

impl Tensor {
    /// Matrix product `a · b` with optional transposes, written into `out`.
    ///
    /// Both operands must have depth 1. The output shape is
    /// `(b_w, a_h, 1)` after the transpose flags are applied.
    #[tracing::instrument(skip_all, name = "kernel_dot")]
    pub fn dot_into(
        out: &mut Tensor,
        transpose_a: bool,
        transpose_b: bool,
        a: &Tensor,
        b: &Tensor,
    ) -> NnResult<()> {
        if a.shape().depth != 1 || b.shape().depth != 1 {
            return Err(NnError::BadShape("cannot dot tensors with depth".into()));
        }

        let (a_w, a_h) = if transpose_a {
            (a.shape().height, a.shape().width)
        } else {
            (a.shape().width, a.shape().height)
        };
        let (b_w, b_h) = if transpose_b {
            (b.shape().height, b.shape().width)
        } else {
            (b.shape().width, b.shape().height)
        };

        if a_w != b_h {
            return Err(NnError::BadShape(format!(
                "cannot dot {} x {}: inner dimensions do not align",
                a.shape(),
                b.shape()
            )));
        }

        let out_shape = Shape::new(b_w, a_h, 1);
        if out.alloc() < out_shape.size() {
            return Err(NnError::AllocSize(format!(
                "dot output needs {} elements, alloc is {}",
                out_shape.size(),
                out.alloc()
            )));
        }

        let lhs = {
            let v = view2(a)?;
            if transpose_a {
                v.reversed_axes()
            } else {
                v
            }
        };
        let rhs = {
            let v = view2(b)?;
            if transpose_b {
                v.reversed_axes()
            } else {
                v
            }
        };

        out.set_shape(out_shape)?;
        let mut out_view = ArrayViewMut2::from_shape(
            (out_shape.height as usize, out_shape.width as usize),
            out.data_mut(),
        )
        .map_err(|e| NnError::BadShape(format!("2d view: {e}")))?;

        general_mat_mul(1.0, &lhs, &rhs, 0.0, &mut out_view);
        Ok(())
    }

    pub fn dot(transpose_a: bool, transpose_b: bool, a: &Tensor, b: &Tensor) -> NnResult<Tensor> {
        let shape = Shape::new(
            if transpose_b {
                b.shape().height
            } else {
                b.shape().width
            },
            if transpose_a {
                a.shape().width
            } else {
                a.shape().height
            },
            1,
        );
        let mut out = Tensor::new(shape)?;
        Tensor::dot_into(&mut out, transpose_a, transpose_b, a, b)?;
        Ok(out)
    }

    /// `self = self · b`, routing the left operand through scratch so the
    /// product can land back in this tensor's buffer.
    pub fn dot_assign(&mut self, transpose_b: bool, b: &Tensor) -> NnResult<()> {
        scratch::with(|s| {
            let mut lhs = s.take(self.shape());
            let result = lhs
                .copy_from(self)
                .and_then(|_| Tensor::dot_into(self, false, transpose_b, &lhs, b));
            s.put(lhs);
            result
        })
    }

    /// Lays convolution patches out as columns: output shape
    /// `(x_kernels * y_kernels, depth * K * K, 1)` where
    /// `x_kernels = (W + 2P - K)/S + 1`. Out-of-bounds reads become 0.
    pub fn im2col_into(
        out: &mut Tensor,
        input: &Tensor,
        kernel_size: u32,
        stride: u32,
        padding: u32,
    ) -> NnResult<()> {
        let (x_kernels, y_kernels) = im2col_kernels(input.shape(), kernel_size, stride, padding)?;

        let out_shape = Shape::new(
            x_kernels * y_kernels,
            input.shape().depth * kernel_size * kernel_size,
            1,
        );
        if out.alloc() < out_shape.size() {
            return Err(NnError::AllocSize(format!(
                "im2col output needs {} elements, alloc is {}",
                out_shape.size(),
                out.alloc()
            )));
        }
        out.set_shape(out_shape)?;

        let in_shape = input.shape();
        let in_w = in_shape.width as i64;
        let in_h = in_shape.height as i64;
        let out_w = out_shape.width as usize;

        let in_data = input.data();
        let out_data = out.data_mut();
        out_data.iter_mut().for_each(|v| *v = 0.0);

        for z in 0..in_shape.depth {
            for k in 0..kernel_size * kernel_size {
                let x_off = (k % kernel_size) as i64;
                let y_off = (k / kernel_size) as i64;
                let out_y = (z * kernel_size * kernel_size + k) as usize;

                for y in 0..y_kernels {
                    for x in 0..x_kernels {
                        // Padded coordinates can be negative; stay signed
                        // until the bounds check.
                        let in_x = x_off + (x * stride) as i64 - padding as i64;
                        let in_y = y_off + (y * stride) as i64 - padding as i64;

                        if in_x < 0 || in_y < 0 || in_x >= in_w || in_y >= in_h {
                            continue;
                        }

                        let in_index = ((z as i64 * in_h + in_y) * in_w + in_x) as usize;
                        let out_x = (y * x_kernels + x) as usize;
                        out_data[out_y * out_w + out_x] = in_data[in_index];
                    }
                }
            }
        }

        Ok(())
    }

    pub fn im2col(input: &Tensor, kernel_size: u32, stride: u32, padding: u32) -> NnResult<Tensor> {
        let (x_kernels, y_kernels) = im2col_kernels(input.shape(), kernel_size, stride, padding)?;
        let shape = Shape::new(
            x_kernels * y_kernels,
            input.shape().depth * kernel_size * kernel_size,
            1,
        );
        let mut out = Tensor::new(shape)?;
        Tensor::im2col_into(&mut out, input, kernel_size, stride, padding)?;
        Ok(out)
    }

    /// Inverse of `im2col`: scatters columns back into image layout,
    /// summing overlapping kernel contributions.
    pub fn col2im_into(
        out: &mut Tensor,
        input: &Tensor,
        out_shape: Shape,
        kernel_size: u32,
        stride: u32,
        padding: u32,
    ) -> NnResult<()> {
        let (x_kernels, y_kernels) = im2col_kernels(out_shape, kernel_size, stride, padding)?;

        if out.alloc() < out_shape.size() {
            return Err(NnError::AllocSize(format!(
                "col2im output needs {} elements, alloc is {}",
                out_shape.size(),
                out.alloc()
            )));
        }
        out.set_shape(out_shape)?;

        let img_w = out_shape.width as i64;
        let img_h = out_shape.height as i64;
        let in_w = input.shape().width as usize;

        let in_data = input.data();
        let out_data = out.data_mut();
        out_data.iter_mut().for_each(|v| *v = 0.0);

        for z in 0..out_shape.depth {
            for k in 0..kernel_size * kernel_size {
                let x_off = (k % kernel_size) as i64;
                let y_off = (k / kernel_size) as i64;
                let in_y = (z * kernel_size * kernel_size + k) as usize;

                for y in 0..y_kernels {
                    for x in 0..x_kernels {
                        let img_x = x_off + (x * stride) as i64 - padding as i64;
                        let img_y = y_off + (y * stride) as i64 - padding as i64;

                        if img_x < 0 || img_y < 0 || img_x >= img_w || img_y >= img_h {
                            continue;
                        }

                        let in_x = (y * x_kernels + x) as usize;
                        let out_index = ((z as i64 * img_h + img_y) * img_w + img_x) as usize;
                        out_data[out_index] += in_data[in_y * in_w + in_x];
                    }
                }
            }
        }

        Ok(())
    }

    pub fn col2im(
        input: &Tensor,
        out_shape: Shape,
        kernel_size: u32,
        stride: u32,
        padding: u32,
    ) -> NnResult<Tensor> {
        let mut out = Tensor::new(out_shape)?;
        Tensor::col2im_into(&mut out, input, out_shape, kernel_size, stride, padding)?;
        Ok(out)
    }

    /// 2D transpose into a fresh tensor.
    pub fn transpose(t: &Tensor) -> NnResult<Tensor> {
        if t.shape().depth != 1 {
            return Err(NnError::BadShape("cannot transpose tensor with depth".into()));
        }
        let mut out = Tensor::new(Shape::new(t.shape().height, t.shape().width, 1))?;
        transpose_write(&mut out, t);
        Ok(out)
    }

    /// In-place 2D transpose. Vectors only need their shape swapped; full
    /// matrices go through a scratch copy.
    pub fn transpose_ip(&mut self) -> NnResult<()> {
        if self.shape().depth != 1 {
            return Err(NnError::BadShape("cannot transpose tensor with depth".into()));
        }

        let old = self.shape();
        let new_shape = Shape::new(old.height, old.width, 1);
        if old.width == 1 || old.height == 1 {
            return self.set_shape(new_shape);
        }

        scratch::with(|s| {
            let mut orig = s.take(old);
            let result = orig.copy_from(self).and_then(|_| {
                self.set_shape(new_shape)?;
                transpose_write(self, &orig);
                Ok(())
            });
            s.put(orig);
            result
        })
    }

    pub fn add_into(out: &mut Tensor, a: &Tensor, b: &Tensor) -> NnResult<()> {
        binary_into(out, a, b, "add", |x, y| x + y)
    }
    pub fn sub_into(out: &mut Tensor, a: &Tensor, b: &Tensor) -> NnResult<()> {
        binary_into(out, a, b, "subtract", |x, y| x - y)
    }
    pub fn mul_into(out: &mut Tensor, a: &Tensor, b: &Tensor) -> NnResult<()> {
        binary_into(out, a, b, "multiply", |x, y| x * y)
    }
    pub fn div_into(out: &mut Tensor, a: &Tensor, b: &Tensor) -> NnResult<()> {
        binary_into(out, a, b, "divide", |x, y| x / y)
    }

    pub fn add_ip(&mut self, rhs: &Tensor) -> NnResult<()> {
        binary_ip(self, rhs, "add", |x, y| x + y)
    }
    pub fn sub_ip(&mut self, rhs: &Tensor) -> NnResult<()> {
        binary_ip(self, rhs, "subtract", |x, y| x - y)
    }
    /// Hadamard product.
    pub fn mul_ip(&mut self, rhs: &Tensor) -> NnResult<()> {
        binary_ip(self, rhs, "multiply", |x, y| x * y)
    }
    pub fn div_ip(&mut self, rhs: &Tensor) -> NnResult<()> {
        binary_ip(self, rhs, "divide", |x, y| x / y)
    }

    pub fn add_scalar_ip(&mut self, x: f32) {
        for v in self.data_mut() {
            *v += x;
        }
    }

    pub fn scale_ip(&mut self, s: f32) {
        for v in self.data_mut() {
            *v *= s;
        }
    }

    pub fn sqrt_ip(&mut self) {
        for v in self.data_mut() {
            *v = v.sqrt();
        }
    }

    pub fn square_ip(&mut self) {
        for v in self.data_mut() {
            *v *= *v;
        }
    }
}

fn im2col_kernels(
    input: Shape,
    kernel_size: u32,
    stride: u32,
    padding: u32,
) -> NnResult<(u32, u32)> {
    if stride == 0 {
        return Err(NnError::InvalidInput("im2col stride cannot be zero".into()));
    }
    if kernel_size == 0 {
        return Err(NnError::InvalidInput("im2col kernel cannot be zero".into()));
    }
    if input.width + padding * 2 < kernel_size || input.height + padding * 2 < kernel_size {
        return Err(NnError::BadShape(format!(
            "kernel {} does not fit in padded input {}",
            kernel_size, input
        )));
    }
    Ok((
        (input.width + padding * 2 - kernel_size) / stride + 1,
        (input.height + padding * 2 - kernel_size) / stride + 1,
    ))
}

fn transpose_write(out: &mut Tensor, t: &Tensor) {
    let out_w = out.shape().width as usize;
    let out_h = out.shape().height as usize;
    let t_w = t.shape().width as usize;

    let src = t.data();
    let dst = out.data_mut();
    for y in 0..out_h {
        for x in 0..out_w {
            dst[x + y * out_w] = src[y + x * t_w];
        }
    }
}

fn binary_into(
    out: &mut Tensor,
    a: &Tensor,
    b: &Tensor,
    what: &str,
    f: impl Fn(f32, f32) -> f32,
) -> NnResult<()> {
    if a.shape() != b.shape() {
        return Err(NnError::BadShape(format!(
            "cannot {} tensors: shapes {} and {} do not align",
            what,
            a.shape(),
            b.shape()
        )));
    }
    if out.alloc() < a.len() {
        return Err(NnError::AllocSize(format!(
            "cannot {} tensors: output alloc {} is smaller than {}",
            what,
            out.alloc(),
            a.len()
        )));
    }
    out.set_shape(a.shape())?;
    for ((o, &x), &y) in out.data_mut().iter_mut().zip(a.data()).zip(b.data()) {
        *o = f(x, y);
    }
    Ok(())
}

fn binary_ip(
    t: &mut Tensor,
    rhs: &Tensor,
    what: &str,
    f: impl Fn(f32, f32) -> f32,
) -> NnResult<()> {
    if t.shape() != rhs.shape() {
        return Err(NnError::BadShape(format!(
            "cannot {} tensors: shapes {} and {} do not align",
            what,
            t.shape(),
            rhs.shape()
        )));
    }
    for (v, &y) in t.data_mut().iter_mut().zip(rhs.data()) {
        *v = f(*v, y);
    }
    Ok(())
}

// Operator overloads for ergonomic test and demo code. These panic on
// shape mismatch like the underlying ndarray operators would.
impl std::ops::Add for &Tensor {
    type Output = Tensor;
    fn add(self, rhs: Self) -> Tensor {
        let mut out = Tensor::new(self.shape()).expect("tensor add");
        Tensor::add_into(&mut out, self, rhs).expect("tensor add");
        out
    }
}

impl std::ops::Sub for &Tensor {
    type Output = Tensor;
    fn sub(self, rhs: Self) -> Tensor {
        let mut out = Tensor::new(self.shape()).expect("tensor sub");
        Tensor::sub_into(&mut out, self, rhs).expect("tensor sub");
        out
    }
}

impl std::ops::Mul<f32> for &Tensor {
    type Output = Tensor;
    fn mul(self, rhs: f32) -> Tensor {
        let mut out = self.clone();
        out.scale_ip(rhs);
        out
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape() == other.shape() && self.data() == other.data()
    }
}
