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

//! Entity lifecycle services.
//!
//! Every mutation flows through the same sequence: attributes pass the type's
//! [`AttributePipeline`], the [`EntityRepository`] commits the change through an
//! [`cairn_core::EntityStore`], and the [`Publisher`] announces the resulting
//! state on the type's topic pair. Delivery failures after a commit are logged
//! and counted, never returned as errors. The [`EditContextCoordinator`] runs
//! beside the repository and re-publishes entity state whenever an edit context
//! is set or cleared.
//!
//! Layout: `normalize.rs` (identifier normalizer), `pipeline.rs` (attribute
//! steps), `publisher.rs` with `locks.rs` (per-entity announcement order),
//! `repository.rs`, `coordinator.rs`, `typed.rs`
//! (typed views), `label.rs` and `kill_chain_phase.rs` (per-type services),
//! `services.rs` (wiring).

pub mod coordinator;
pub mod error;
pub mod kill_chain_phase;
pub mod label;
mod locks;
pub mod normalize;
pub mod pipeline;
pub mod publisher;
pub mod repository;
pub mod services;
pub mod typed;

pub use coordinator::EditContextCoordinator;
pub use error::{DomainError, DomainResult};
pub use kill_chain_phase::{AddKillChainPhase, KillChainPhase, KillChainPhaseService};
pub use label::{AddLabel, Label, LabelService};
pub use normalize::{normalize_name, normalize_value, standard_id, string_to_colour};
pub use pipeline::{AttributePipeline, AttributeStep, ValidationFailure};
pub use publisher::Publisher;
pub use repository::{EntityPager, EntityRepository, RepositorySettings};
pub use services::{DomainServices, DomainSettings};
pub use typed::{Annotated, EntityView};
