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

//! Notification bus for entity lifecycle events.
//!
//! Every entity type owns one (created, edited) topic pair resolved through an
//! immutable [`TopicRegistry`] built at startup. The [`NotificationBus`] fans
//! notifications out over `tokio::broadcast`: publishing never awaits, each
//! subscriber observes notifications in publish order, and nothing is replayed
//! to subscribers that connect later.

pub mod error;
pub mod payloads;
pub mod routing;
pub mod topics;

pub use error::{NotificationDeliveryWarning, SubscriptionError, TopicRegistryError};
pub use payloads::{
    DEFAULT_BUS_CAPACITY, Delivery, LifecycleAction, MAX_BUS_CAPACITY, Notification,
    NotificationId,
};
pub use routing::{NotificationBus, Subscription};
pub use topics::{Topic, TopicFilter, TopicKind, TopicPair, TopicRegistry, TopicRegistryBuilder};
