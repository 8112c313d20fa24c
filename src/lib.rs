// Session-recording ingestion consumer - core library module.

pub mod adapters;
pub mod buffer;
pub mod collaborators;
pub mod commit;
pub mod config;
pub mod error;
pub mod fakes;
pub mod ingester;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod overflow;
pub mod partition_tracker;
pub mod registry;
pub mod watermark;

pub use config::Config;
pub use error::{IngestError, Result};
pub use ingester::{Ingester, Subsystems};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
