pub mod config;
pub mod error;
pub mod resource;
pub mod task;

pub use config::PoolConfig;
pub use error::*;
pub use resource::*;
pub use task::*;
