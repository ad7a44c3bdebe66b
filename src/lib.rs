pub mod config;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod services;
pub mod storage;

pub use config::Config;
pub use delivery::{DeliveryRegistry, PushFrame, StreamClient};
pub use error::{AppError, Result};
pub use storage::{MemoryStore, PgStore, Store};
