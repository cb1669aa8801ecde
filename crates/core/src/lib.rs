pub mod config;
pub mod error;
pub mod model;

pub use config::Config;
pub use error::*;
pub use model::*;
