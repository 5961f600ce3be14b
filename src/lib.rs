pub mod calibration;
pub mod clock;
pub mod config;
pub mod domain;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod forest;
pub mod gate;
pub mod head_to_head;
pub mod logging;
pub mod logistic;
pub mod performance;
pub mod pipeline;
pub mod rate_limiter;
pub mod scaler;
pub mod sport;
pub mod sqlite_store;
pub mod store;
pub mod team_features;
pub mod training;
pub mod value;

pub use error::{PipelineError, Result, StoreError};
pub use pipeline::SignalPipeline;
