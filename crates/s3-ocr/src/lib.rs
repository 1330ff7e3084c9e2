pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod progress;
pub mod services;

pub use error::AppError;
