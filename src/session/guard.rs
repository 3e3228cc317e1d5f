//! One route guard for every portal, parameterized by role.
//!
//! A guard never decides while the first `check_auth` is still running; it
//! reports `Pending` instead. Afterwards a missing user or a user of another
//! role is sent to the portal's login page.

use tokio::sync::watch;

use super::{Session, SessionState};
use crate::net::types::UserProfile;
use crate::role::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Initial auth check has not finished; render a loading placeholder.
    Pending,
    Redirect(&'static str),
    Allow,
}

/// Result of rendering through a guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<V> {
    Loading,
    Redirect(&'static str),
    View(V),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteGuard {
    role: Role,
}

impl RouteGuard {
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn decide(&self, state: &SessionState) -> GuardDecision {
        if state.is_initial_loading {
            return GuardDecision::Pending;
        }
        match &state.user {
            Some(user) if user.role == self.role => GuardDecision::Allow,
            _ => GuardDecision::Redirect(self.role.routes().login_route),
        }
    }

    /// Wait until the guard can decide. A closed channel counts as logged
    /// out.
    pub async fn wait(&self, state: &mut watch::Receiver<SessionState>) -> GuardDecision {
        if state.wait_for(|s| !s.is_initial_loading).await.is_err() {
            return GuardDecision::Redirect(self.role.routes().login_route);
        }
        let snapshot = state.borrow().clone();
        self.decide(&snapshot)
    }

    /// Render `view` for the signed-in user, or navigate away.
    pub fn render<V>(&self, session: &Session, view: impl FnOnce(&UserProfile) -> V) -> Guarded<V> {
        let state = session.state();
        match self.decide(&state) {
            GuardDecision::Pending => Guarded::Loading,
            GuardDecision::Redirect(route) => {
                tracing::debug!(role = %self.role, %route, "guard redirect");
                session.navigate(route);
                Guarded::Redirect(route)
            }
            GuardDecision::Allow => match state.user.as_ref() {
                Some(user) => Guarded::View(view(user)),
                None => Guarded::Redirect(self.role.routes().login_route),
            },
        }
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
