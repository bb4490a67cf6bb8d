//! 2D pooling over non-overlapping windows (stride equals the window).

use super::{Layer, LayerKind, LayersCache};
use crate::errors::{NnError, NnResult};
use crate::scratch;
use crate::tensor::Tensor;
use crate::types::Shape;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Max,
    Avg,
}

impl PoolKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolKind::Max => "max",
            PoolKind::Avg => "avg",
        }
    }

    pub fn from_name(name: &str) -> NnResult<Self> {
        match name {
            "max" => Ok(PoolKind::Max),
            "avg" => Ok(PoolKind::Avg),
            _ => Err(NnError::InvalidEnum(format!("unknown pooling '{name}'"))),
        }
    }
}

pub struct Pooling2dLayer {
    pool_w: u32,
    pool_h: u32,
    pool: PoolKind,
    in_shape: Shape,
    shape: Shape,
}

impl Pooling2dLayer {
    pub fn new(pool_size: Shape, pool: PoolKind, prev_shape: Shape) -> NnResult<Self> {
        let (pool_w, pool_h) = (pool_size.width, pool_size.height);
        if pool_w == 0 || pool_h == 0 {
            return Err(NnError::Create("pooling window cannot be zero".into()));
        }
        if pool_w > prev_shape.width || pool_h > prev_shape.height {
            return Err(NnError::BadShape(format!(
                "pooling window ({pool_w}, {pool_h}) does not fit input {prev_shape}"
            )));
        }

        Ok(Self {
            pool_w,
            pool_h,
            pool,
            in_shape: prev_shape,
            shape: Shape::new(
                prev_shape.width / pool_w,
                prev_shape.height / pool_h,
                prev_shape.depth,
            ),
        })
    }
}

impl Layer for Pooling2dLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Pooling2d
    }

    fn out_shape(&self) -> Shape {
        self.shape
    }

    fn forward(&self, in_out: &mut Tensor, cache: Option<&mut LayersCache>) -> NnResult<()> {
        let in_shape = self.in_shape;
        let out_shape = self.shape;

        let (in_w, in_h) = (in_shape.width as usize, in_shape.height as usize);
        let (out_w, out_h) = (out_shape.width as usize, out_shape.height as usize);
        let (pw, ph) = (self.pool_w as usize, self.pool_h as usize);

        // Max pooling remembers, per output element, the flat input index
        // that won, so backward can route the gradient to it.
        let mut winners = match self.pool {
            PoolKind::Max if cache.is_some() => Some(Tensor::new(out_shape)?),
            _ => None,
        };

        scratch::with(|s| -> NnResult<()> {
            let mut input = s.take(in_shape);
            input.copy_from(in_out)?;

            in_out.set_shape(out_shape)?;
            let src = input.data();
            let dst = in_out.data_mut();

            for z in 0..out_shape.depth as usize {
                for oy in 0..out_h {
                    for ox in 0..out_w {
                        let out_index = (z * out_h + oy) * out_w + ox;

                        match self.pool {
                            PoolKind::Max => {
                                let mut best = f32::MIN;
                                let mut best_index = 0usize;
                                for ky in 0..ph {
                                    for kx in 0..pw {
                                        let in_index = (z * in_h + oy * ph + ky) * in_w
                                            + ox * pw
                                            + kx;
                                        if src[in_index] > best {
                                            best = src[in_index];
                                            best_index = in_index;
                                        }
                                    }
                                }
                                dst[out_index] = best;
                                if let Some(w) = &mut winners {
                                    w.data_mut()[out_index] = best_index as f32;
                                }
                            }
                            PoolKind::Avg => {
                                let mut sum = 0.0;
                                for ky in 0..ph {
                                    for kx in 0..pw {
                                        sum += src[(z * in_h + oy * ph + ky) * in_w
                                            + ox * pw
                                            + kx];
                                    }
                                }
                                dst[out_index] = sum / (pw * ph) as f32;
                            }
                        }
                    }
                }
            }

            s.put(input);
            Ok(())
        })?;

        if let (Some(cache), Some(winners)) = (cache, winners) {
            cache.push(winners);
        }
        Ok(())
    }

    fn backward(&self, delta: &mut Tensor, cache: &mut LayersCache) -> NnResult<()> {
        let winners = match self.pool {
            PoolKind::Max => Some(cache.pop()?),
            PoolKind::Avg => None,
        };

        let out_shape = self.shape;
        let in_shape = self.in_shape;
        let (in_w, in_h) = (in_shape.width as usize, in_shape.height as usize);
        let (out_w, out_h) = (out_shape.width as usize, out_shape.height as usize);
        let (pw, ph) = (self.pool_w as usize, self.pool_h as usize);

        scratch::with(|s| -> NnResult<()> {
            let mut out_delta = s.take(out_shape);
            out_delta.copy_from(delta)?;

            delta.set_shape(in_shape)?;
            delta.fill(0.0);

            let src = out_delta.data();
            let dst = delta.data_mut();

            match (&self.pool, &winners) {
                (PoolKind::Max, Some(winners)) => {
                    for (i, &w) in winners.data().iter().enumerate() {
                        dst[w as usize] = src[i];
                    }
                }
                _ => {
                    // Average pooling spreads each delta uniformly over its
                    // window.
                    let inv = 1.0 / (pw * ph) as f32;
                    for z in 0..out_shape.depth as usize {
                        for oy in 0..out_h {
                            for ox in 0..out_w {
                                let v = src[(z * out_h + oy) * out_w + ox] * inv;
                                for ky in 0..ph {
                                    for kx in 0..pw {
                                        dst[(z * in_h + oy * ph + ky) * in_w + ox * pw + kx] +=
                                            v;
                                    }
                                }
                            }
                        }
                    }
                }
            }

            s.put(out_delta);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_pool_forward_and_routing() {
        let layer = Pooling2dLayer::new(
            Shape::new(2, 2, 1),
            PoolKind::Max,
            Shape::new(4, 4, 1),
        )
        .unwrap();

        #[rustfmt::skip]
        let data = [
            1.0, 2.0,  0.0, 0.0,
            3.0, 4.0,  0.0, 5.0,
            0.0, 0.0,  6.0, 0.0,
            0.0, 7.0,  0.0, 8.0,
        ];
        let mut x = Tensor::with_alloc(Shape::new(4, 4, 1), 16).unwrap();
        x.data_mut().copy_from_slice(&data);

        let mut cache = LayersCache::new();
        layer.forward(&mut x, Some(&mut cache)).unwrap();
        assert_eq!(x.shape(), Shape::new(2, 2, 1));
        assert_eq!(x.data(), &[4.0, 5.0, 7.0, 8.0]);

        let mut delta = x.clone();
        layer.backward(&mut delta, &mut cache).unwrap();
        assert_eq!(delta.shape(), Shape::new(4, 4, 1));
        // Gradient lands only on the winners.
        assert_eq!(delta.at(1, 1, 0), 4.0);
        assert_eq!(delta.at(3, 1, 0), 5.0);
        assert_eq!(delta.at(1, 3, 0), 7.0);
        assert_eq!(delta.at(3, 3, 0), 8.0);
        assert_eq!(delta.at(0, 0, 0), 0.0);
    }

    #[test]
    fn avg_pool_spreads_gradient() {
        let layer = Pooling2dLayer::new(
            Shape::new(2, 2, 1),
            PoolKind::Avg,
            Shape::new(2, 2, 1),
        )
        .unwrap();

        let mut x = Tensor::with_alloc(Shape::new(2, 2, 1), 4).unwrap();
        x.data_mut().copy_from_slice(&[1.0, 2.0, 3.0, 6.0]);

        let mut cache = LayersCache::new();
        layer.forward(&mut x, Some(&mut cache)).unwrap();
        assert_eq!(x.data(), &[3.0]);

        let mut delta = Tensor::with_alloc(Shape::new(1, 1, 1), 4).unwrap();
        delta.data_mut()[0] = 4.0;
        layer.backward(&mut delta, &mut cache).unwrap();
        assert_eq!(delta.data(), &[1.0, 1.0, 1.0, 1.0]);
    }
}
