//! # ujsti-portal
//!
//! Session core for the UNIBEN Journal of Science, Technology and Innovation
//! manuscript portal. Three portals (admin, author, reviewer) share one
//! authentication model: a bearer access token kept in a local credential
//! store, a refresh credential held by the server in an HTTP-only cookie, and
//! a per-portal session that decides when a user is signed in.
//!
//! LAYERS
//! ======
//! - `store`: durable local records (tokens, profile) behind an injectable
//!   `CredentialStore` trait.
//! - `net`: the refresh-aware API client. Attaches bearer credentials,
//!   collapses concurrent refreshes into one call, retries once on 401.
//! - `session`: the per-portal state machine and the role-parameterized
//!   route guard.

pub mod config;
pub mod net;
pub mod role;
pub mod session;
pub mod store;

pub use config::ClientConfig;
pub use net::client::ApiClient;
pub use role::Role;
pub use session::Session;
pub use store::credentials::Credentials;
