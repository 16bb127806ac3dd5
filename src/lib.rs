//! pordisto: session lifecycle and federated identity service.
//!
//! The [`auth`] module holds the transport-agnostic core; [`store`] and
//! [`gateway`] are the Postgres and outbound-HTTP adapters; [`api`] is the
//! thin axum surface; [`cli`] wires everything together at startup.

pub mod api;
pub mod auth;
pub mod cli;
pub mod gateway;
pub mod store;
