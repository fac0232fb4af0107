pub mod address;
pub mod codec;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod fixed_point;
pub mod output;
pub mod rewards;
pub mod simulation;
pub mod store;
pub mod sweep;

pub use address::Address;
pub use config::EngineConfig;
pub use engine::{ChunkOutcome, Parameter, RewardController};
pub use error::{Result, RewardError};
