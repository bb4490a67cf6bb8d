//! Cost functions: value and per-element gradient.

use crate::errors::{NnError, NnResult};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

const CCE_EPSILON: f32 = 1e-8;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostKind {
    MeanSquaredError,
    CategoricalCrossEntropy,
}

impl CostKind {
    /// Scalar cost of a prediction against a target of equal shape.
    pub fn value(&self, prediction: &Tensor, target: &Tensor) -> NnResult<f32> {
        check_shapes(prediction, target)?;

        let sum = match self {
            // C = (1/N) * sum(0.5 * (a - y)^2)
            CostKind::MeanSquaredError => {
                let sum: f32 = prediction
                    .data()
                    .iter()
                    .zip(target.data())
                    .map(|(&a, &y)| 0.5 * (a - y) * (a - y))
                    .sum();
                sum / prediction.len() as f32
            }
            // C = -sum(y * ln(a))
            CostKind::CategoricalCrossEntropy => {
                let sum: f32 = prediction
                    .data()
                    .iter()
                    .zip(target.data())
                    .map(|(&a, &y)| y * a.ln())
                    .sum();
                -sum
            }
        };

        Ok(sum)
    }

    /// Writes the per-element gradient over the prediction, in place.
    ///
    /// Batch averaging is applied later by the optimizer, not here.
    pub fn grad_ip(&self, prediction: &mut Tensor, target: &Tensor) -> NnResult<()> {
        check_shapes(prediction, target)?;

        match self {
            CostKind::MeanSquaredError => {
                for (a, &y) in prediction.data_mut().iter_mut().zip(target.data()) {
                    *a -= y;
                }
            }
            CostKind::CategoricalCrossEntropy => {
                for (a, &y) in prediction.data_mut().iter_mut().zip(target.data()) {
                    *a = -y / (*a + CCE_EPSILON);
                }
            }
        }

        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            CostKind::MeanSquaredError => "mean_squared_error",
            CostKind::CategoricalCrossEntropy => "categorical_cross_entropy",
        }
    }
}

fn check_shapes(prediction: &Tensor, target: &Tensor) -> NnResult<()> {
    if prediction.shape() != target.shape() {
        return Err(NnError::InvalidInput(format!(
            "prediction {} and target {} must align in cost function",
            prediction.shape(),
            target.shape()
        )));
    }
    Ok(())
}
