//! Fallback values applied when a variable is unset.

use std::time::Duration;

pub(crate) const DATABASE_MAX_CONNECTIONS: u32 = 5;
pub(crate) const BUS_CAPACITY: usize = 1_024;
/// Matches the largest queue the notification bus allocates.
pub(crate) const MAX_BUS_CAPACITY: usize = 65_536;
pub(crate) const EDIT_CONTEXT_TTL: Duration = Duration::from_secs(600);
pub(crate) const EDIT_CONTEXT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_PAGE_SIZE: usize = 50;
pub(crate) const MAX_PAGE_SIZE: usize = 500;
