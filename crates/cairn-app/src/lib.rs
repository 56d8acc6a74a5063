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

//! cairn application bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (dependency construction, background tasks,
//! shutdown), `error.rs` (`AppError`).

/// Application bootstrap and background tasks.
pub mod bootstrap;
/// Application-level errors.
pub mod error;

pub use bootstrap::{Application, run_app};
pub use error::{AppError, AppResult};
