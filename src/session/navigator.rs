//! Route changes requested by the session.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Whatever owns routing in the host UI.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

/// Navigator that records every route it is sent to.
#[derive(Debug, Default)]
pub struct HistoryNavigator {
    visited: Mutex<Vec<String>>,
}

impl HistoryNavigator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent route, if any.
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.lock().last().cloned()
    }

    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.visited.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, route: &str) {
        tracing::debug!(%route, "navigate");
        self.lock().push(route.to_owned());
    }
}
