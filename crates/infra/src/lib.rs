//! Infrastructure layer: persistence boundary, unit of work, services, config.

pub mod config;
pub mod services;
pub mod store;


pub use config::{ConfigError, LedgerConfig};
pub use services::{LedgerContext, LedgerServices};
pub use store::{InMemoryLedgerStore, LedgerStore};
