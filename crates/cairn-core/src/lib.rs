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
#![allow(clippy::module_name_repetitions)]

//! Store-agnostic entity model and persistence boundaries.
//!
//! Layout: `model/` (entity records, edit contexts, listing arguments),
//! `service/` (durable and ephemeral store traits), `error.rs` (`StoreError`).

pub mod error;
pub mod model;
pub mod service;

pub use error::{StoreError, StoreResult};
pub use model::{
    Actor, Attributes, CreateOutcome, Cursor, DuplicatePolicy, EditContext, EditInput, EntityId,
    EntityPatch, EntityRecord, EntitySnapshot, EntityType, Filter, ListArgs, NewEntity, OrderMode,
    Page, PageInfo, StandardId, attribute_text,
};
pub use service::{EditContextStore, EntityStore};
