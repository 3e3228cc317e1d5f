//! Portal roles and the routes/endpoints each one uses.
//!
//! DESIGN
//! ======
//! Every role-dependent decision (which login endpoint to call, where to send
//! the user after login or logout) goes through [`Role::routes`], so adding a
//! portal is a one-row change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three portals a user can sign in to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Author,
    Reviewer,
}

/// Endpoints and routes tied to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleRoutes {
    /// API path of the role-specific login endpoint.
    pub login_endpoint: &'static str,
    /// UI route of the role's login page.
    pub login_route: &'static str,
    /// UI route the user lands on after a successful login.
    pub dashboard_route: &'static str,
}

const ADMIN_ROUTES: RoleRoutes = RoleRoutes {
    login_endpoint: "/auth/admin-login",
    login_route: "/admin/login",
    dashboard_route: "/admin/dashboard",
};

const AUTHOR_ROUTES: RoleRoutes = RoleRoutes {
    login_endpoint: "/auth/author-login",
    login_route: "/author/login",
    dashboard_route: "/author/dashboard",
};

const REVIEWER_ROUTES: RoleRoutes = RoleRoutes {
    login_endpoint: "/auth/reviewer-login",
    login_route: "/reviewer/login",
    dashboard_route: "/reviewer/dashboard",
};

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Author, Role::Reviewer];

    #[must_use]
    pub const fn routes(self) -> &'static RoleRoutes {
        match self {
            Role::Admin => &ADMIN_ROUTES,
            Role::Author => &AUTHOR_ROUTES,
            Role::Reviewer => &REVIEWER_ROUTES,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Author => "author",
            Role::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0} (expected admin, author or reviewer)")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "author" => Ok(Role::Author),
            "reviewer" => Ok(Role::Reviewer),
            other => Err(ParseRoleError(other.to_owned())),
        }
    }
}

/// Endpoints that must never carry a bearer token and never trigger a refresh.
#[must_use]
pub fn is_unauthenticated_endpoint(path: &str) -> bool {
    strip_query(path) == REFRESH_TOKEN_ENDPOINT || is_login_endpoint(path)
}

/// True for any of the role login endpoints.
#[must_use]
pub fn is_login_endpoint(path: &str) -> bool {
    let path = strip_query(path);
    Role::ALL.iter().any(|role| role.routes().login_endpoint == path)
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

pub const REFRESH_TOKEN_ENDPOINT: &str = "/auth/refresh-token";
pub const VERIFY_TOKEN_ENDPOINT: &str = "/auth/verify-token";
pub const LOGOUT_ENDPOINT: &str = "/auth/logout";

#[cfg(test)]
#[path = "role_test.rs"]
mod tests;
