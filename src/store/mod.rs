pub mod config_store;
pub mod models;
pub mod records;
pub mod results;

pub use config_store::ConfigStore;
pub use records::{GradeStats, PredictionStore, QueryFilter, StatusCounts};
pub use results::ResultStore;
