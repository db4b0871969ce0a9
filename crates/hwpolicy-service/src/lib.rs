pub mod config;
pub mod error;
mod framing;
pub mod logging;
mod persist;
pub mod protocol;
pub mod server;
pub mod service;
pub mod ticker;

pub use config::{PolicySettings, ServiceConfig, Transport};
pub use error::{ConfigError, PolicyError};
pub use server::RpcServer;
pub use service::{Applied, Persistence, PolicyService, StartupOrigin};
pub use ticker::DecayTicker;
