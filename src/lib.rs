pub mod backend;
pub mod central;
pub mod config;
pub mod dns;
pub mod error;
pub mod graceful_shutdown;
pub mod http_server;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod reconciler;
pub mod status;

pub use dns::DNSPacket;
pub use error::{PoolManagerError, Result};
pub use manager::{EngineSettings, PoolManager, PropagationState};
