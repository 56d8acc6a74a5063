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

//! Store adapters behind the `cairn-core` boundaries.
//!
//! `MemoryEntityStore` and `MemoryEditContextStore` keep everything in process;
//! `PgEntityStore` persists entities in Postgres and applies its migrations on
//! construction.

pub mod context;
pub mod error;
pub mod memory;
pub mod postgres;

pub use context::MemoryEditContextStore;
pub use error::{DataError, Result as DataResult};
pub use memory::MemoryEntityStore;
pub use postgres::PgEntityStore;
