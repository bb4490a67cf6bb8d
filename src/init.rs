//! Parameter initialization policies.

use crate::errors::{NnError, NnResult};
use crate::rng;
use crate::tensor::Tensor;
use ndarray_rand::rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamInit {
    Zeros,
    Ones,
    /// Uniform in +-sqrt(6 / (fan_in + fan_out)).
    XavierUniform,
    /// Normal with sigma = sqrt(2 / (fan_in + fan_out)).
    XavierNormal,
    /// Uniform in +-sqrt(6 / fan_in).
    HeUniform,
    /// Normal with sigma = sqrt(2 / fan_in).
    HeNormal,
}

impl ParamInit {
    pub fn apply(&self, param: &mut Tensor, fan_in: usize, fan_out: usize) -> NnResult<()> {
        match self {
            ParamInit::Zeros => param.fill(0.0),
            ParamInit::Ones => param.fill(1.0),
            ParamInit::XavierUniform => {
                let scale = (6.0 / (fan_in + fan_out) as f32).sqrt();
                fill_uniform(param, scale);
            }
            ParamInit::XavierNormal => {
                let sigma = (2.0 / (fan_in + fan_out) as f32).sqrt();
                fill_normal(param, sigma)?;
            }
            ParamInit::HeUniform => {
                let scale = (6.0 / fan_in as f32).sqrt();
                fill_uniform(param, scale);
            }
            ParamInit::HeNormal => {
                let sigma = (2.0 / fan_in as f32).sqrt();
                fill_normal(param, sigma)?;
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamInit::Zeros => "zeros",
            ParamInit::Ones => "ones",
            ParamInit::XavierUniform => "xavier_uniform",
            ParamInit::XavierNormal => "xavier_normal",
            ParamInit::HeUniform => "he_uniform",
            ParamInit::HeNormal => "he_normal",
        }
    }

    pub fn from_name(name: &str) -> NnResult<Self> {
        match name {
            "zeros" => Ok(ParamInit::Zeros),
            "ones" => Ok(ParamInit::Ones),
            "xavier_uniform" => Ok(ParamInit::XavierUniform),
            "xavier_normal" => Ok(ParamInit::XavierNormal),
            "he_uniform" => Ok(ParamInit::HeUniform),
            "he_normal" => Ok(ParamInit::HeNormal),
            _ => Err(NnError::InvalidEnum(format!(
                "unknown parameter init '{name}'"
            ))),
        }
    }
}

fn fill_uniform(param: &mut Tensor, scale: f32) {
    let dist = Uniform::new(-scale, scale);
    rng::with(|r| {
        for v in param.data_mut() {
            *v = dist.sample(r);
        }
    });
}

fn fill_normal(param: &mut Tensor, sigma: f32) -> NnResult<()> {
    let dist =
        Normal::new(0.0, sigma).map_err(|e| NnError::Math(format!("normal init: {e}")))?;
    rng::with(|r| {
        for v in param.data_mut() {
            *v = dist.sample(r);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Shape;

    #[test]
    fn xavier_uniform_stays_in_bounds() {
        rng::reseed(11);
        let mut param = Tensor::new(Shape::new(32, 32, 1)).unwrap();
        ParamInit::XavierUniform.apply(&mut param, 32, 32).unwrap();

        let bound = (6.0f32 / 64.0).sqrt();
        for &v in param.data() {
            assert!(v >= -bound && v <= bound);
        }
    }

    #[test]
    fn ones_and_zeros() {
        let mut param = Tensor::new(Shape::new(4, 1, 1)).unwrap();
        ParamInit::Ones.apply(&mut param, 4, 4).unwrap();
        assert!(param.data().iter().all(|&v| v == 1.0));
        ParamInit::Zeros.apply(&mut param, 4, 4).unwrap();
        assert!(param.is_zero());
    }

    #[test]
    fn names_round_trip() {
        for init in [
            ParamInit::Zeros,
            ParamInit::Ones,
            ParamInit::XavierUniform,
            ParamInit::XavierNormal,
            ParamInit::HeUniform,
            ParamInit::HeNormal,
        ] {
            assert_eq!(ParamInit::from_name(init.name()).unwrap(), init);
        }
    }
}
