//! Process-wide span helpers.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the application-level tracing span for the lifetime of the guard.
    #[must_use]
    pub fn new(store: impl Into<String>) -> Self {
        let store = store.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "cairn",
            store = %store,
            build_sha = %build_sha()
        )));
        Self {
            _guard: span.enter(),
        }
    }
}
