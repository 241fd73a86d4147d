pub mod calibration;
pub mod config;
pub mod error;
pub mod features;
pub mod match_history;
pub mod models;
pub mod predictor;
pub mod venue;
pub mod win_prob;

pub use error::PredictError;
pub use predictor::{PredictionResult, PredictionService, Predictor};
