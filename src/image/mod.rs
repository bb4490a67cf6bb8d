//! Affine image warps for training-data augmentation.
//!
//! The requested matrix maps source to destination; each output pixel is
//! inverse-mapped to a source position and sampled there, with the origin
//! centered on the image. Out-of-bounds reads return 0.

use crate::errors::{NnError, NnResult};
use crate::scratch;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

const DET_FLOOR: f32 = 1e-6;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Nearest,
    Bilinear,
}

/// Row-major 3x3 matrix in tensor coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat3(pub [f32; 9]);

impl Mat3 {
    pub fn identity() -> Self {
        Mat3([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    pub fn translation(x_off: f32, y_off: f32) -> Self {
        Mat3([1.0, 0.0, x_off, 0.0, 1.0, y_off, 0.0, 0.0, 1.0])
    }

    pub fn scale(x_scale: f32, y_scale: f32) -> Self {
        Mat3([x_scale, 0.0, 0.0, 0.0, y_scale, 0.0, 0.0, 0.0, 1.0])
    }

    pub fn rotation(theta: f32) -> Self {
        let (sin, cos) = theta.sin_cos();
        Mat3([cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0])
    }

    pub fn shear(x_shear: f32, y_shear: f32) -> Self {
        Mat3([1.0, x_shear, 0.0, y_shear, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    /// Composition of translation, scale, and rotation, as used by the
    /// trainer's random augmentation.
    pub fn compose(x_off: f32, y_off: f32, x_scale: f32, y_scale: f32, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Mat3([
            x_scale * cos,
            y_scale * -sin,
            x_off,
            x_scale * sin,
            y_scale * cos,
            y_off,
            0.0,
            0.0,
            1.0,
        ])
    }

    pub fn inverse(&self) -> NnResult<Mat3> {
        let m = &self.0;
        let det = m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
            + m[2] * (m[3] * m[7] - m[4] * m[6]);

        if det.abs() < DET_FLOOR {
            return Err(NnError::Math(
                "transformation matrix determinant is near zero".into(),
            ));
        }

        let inv = 1.0 / det;
        Ok(Mat3([
            (m[4] * m[8] - m[5] * m[7]) * inv,
            (m[2] * m[7] - m[1] * m[8]) * inv,
            (m[1] * m[5] - m[2] * m[4]) * inv,
            (m[5] * m[6] - m[3] * m[8]) * inv,
            (m[0] * m[8] - m[2] * m[6]) * inv,
            (m[2] * m[3] - m[0] * m[5]) * inv,
            (m[3] * m[7] - m[4] * m[6]) * inv,
            (m[1] * m[6] - m[0] * m[7]) * inv,
            (m[0] * m[4] - m[1] * m[3]) * inv,
        ]))
    }
}

fn pixel(data: &[f32], width: i64, height: i64, x: i64, y: i64, z: i64) -> f32 {
    if x < 0 || x >= width || y < 0 || y >= height {
        0.0
    } else {
        data[((z * height + y) * width + x) as usize]
    }
}

fn sample(
    data: &[f32],
    width: i64,
    height: i64,
    pos_x: f32,
    pos_y: f32,
    z: i64,
    kind: SampleKind,
) -> f32 {
    let x = pos_x.floor() as i64;
    let y = pos_y.floor() as i64;

    match kind {
        SampleKind::Nearest => pixel(data, width, height, x, y, z),
        SampleKind::Bilinear => {
            let p0 = pixel(data, width, height, x, y, z);
            let p1 = pixel(data, width, height, x + 1, y, z);
            let p2 = pixel(data, width, height, x, y + 1, z);
            let p3 = pixel(data, width, height, x + 1, y + 1, z);

            let tx = pos_x - x as f32;
            let ty = pos_y - y as f32;

            let top = p0 + (p1 - p0) * tx;
            let bot = p2 + (p3 - p2) * tx;
            top + (bot - top) * ty
        }
    }
}

/// Warps `input` by `mat` into `out`.
pub fn transform_into(
    out: &mut Tensor,
    input: &Tensor,
    sample_kind: SampleKind,
    mat: &Mat3,
) -> NnResult<()> {
    if out.alloc() < input.len() {
        return Err(NnError::AllocSize(format!(
            "cannot transform image of {} elements into alloc of {}",
            input.len(),
            out.alloc()
        )));
    }

    let inv = mat.inverse()?.0;

    let shape = input.shape();
    out.set_shape(shape)?;

    let width = shape.width as i64;
    let height = shape.height as i64;
    let x_center = shape.width as f32 / 2.0;
    let y_center = shape.height as f32 / 2.0;

    let src = input.data();
    let dst = out.data_mut();

    for z in 0..shape.depth as i64 {
        for y in 0..height {
            for x in 0..width {
                let px = x as f32 - x_center;
                let py = y as f32 - y_center;

                let sx = px * inv[0] + py * inv[1] + inv[2] + x_center;
                let sy = px * inv[3] + py * inv[4] + inv[5] + y_center;

                dst[((z * height + y) * width + x) as usize] =
                    sample(src, width, height, sx, sy, z, sample_kind);
            }
        }
    }

    Ok(())
}

/// Warps a tensor in place, routing the source copy through scratch.
pub fn transform_ip(t: &mut Tensor, sample_kind: SampleKind, mat: &Mat3) -> NnResult<()> {
    scratch::with(|s| {
        let mut src = s.take(t.shape());
        let result = src
            .copy_from(t)
            .and_then(|_| transform_into(t, &src, sample_kind, mat));
        s.put(src);
        result
    })
}

pub fn transform(input: &Tensor, sample_kind: SampleKind, mat: &Mat3) -> NnResult<Tensor> {
    let mut out = Tensor::new(input.shape())?;
    transform_into(&mut out, input, sample_kind, mat)?;
    Ok(out)
}

pub fn translate_ip(t: &mut Tensor, sample_kind: SampleKind, x_off: f32, y_off: f32) -> NnResult<()> {
    transform_ip(t, sample_kind, &Mat3::translation(x_off, y_off))
}

pub fn scale_ip(t: &mut Tensor, sample_kind: SampleKind, x_scale: f32, y_scale: f32) -> NnResult<()> {
    transform_ip(t, sample_kind, &Mat3::scale(x_scale, y_scale))
}

pub fn rotate_ip(t: &mut Tensor, sample_kind: SampleKind, theta: f32) -> NnResult<()> {
    transform_ip(t, sample_kind, &Mat3::rotation(theta))
}

pub fn shear_ip(t: &mut Tensor, sample_kind: SampleKind, x_shear: f32, y_shear: f32) -> NnResult<()> {
    transform_ip(t, sample_kind, &Mat3::shear(x_shear, y_shear))
}
