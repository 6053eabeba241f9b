pub mod config;
pub mod error;
pub mod event;
pub mod fly;
pub mod flyctl;
pub mod orchestrator;

pub use error::{FlyoverError, Result};
