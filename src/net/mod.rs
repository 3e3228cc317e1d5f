//! API client stack.
//!
//! DESIGN
//! ======
//! `transport` is the only module that touches the wire. `client` layers the
//! request/response interception on top: bearer attachment, refresh on 401,
//! one retry. `single_flight` is the primitive that keeps concurrent 401s
//! down to one refresh call.

pub mod client;
pub mod single_flight;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
