#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Service configuration loaded from `CAIRN_*` environment variables.
//!
//! Layout: `model.rs` (typed sections), `loader.rs` (environment lookup),
//! `validate.rs` (parsing helpers), `defaults.rs` (fallback values).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::env_keys;
pub use model::{
    BusConfig, DatabaseConfig, EditContextConfig, RepositoryConfig, ServiceConfig,
    TelemetryConfig,
};
