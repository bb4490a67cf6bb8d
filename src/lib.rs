pub mod cost;
pub mod errors;
pub mod image;
pub mod init;
pub mod layers;
pub mod network;
pub mod optim;
pub mod rng;
pub mod scratch;
pub mod tensor;
pub mod types;

pub use cost::CostKind;
pub use errors::{NnError, NnResult};
pub use init::ParamInit;
pub use layers::{ActivationKind, Layer, LayerDesc, LayersCache, PoolKind};
pub use network::{EpochInfo, Network, TrainDesc, TransformRanges};
pub use optim::{Optimizer, OptimizerKind, ParamChange};
pub use tensor::{Tensor, TensorList};
pub use types::{Shape, TensorIndex};
