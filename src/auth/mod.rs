//! Session lifecycle and federated identity core.
//!
//! Everything in this module is persistence- and transport-agnostic: the
//! collaborators in [`repository`] and [`gateway`] are injected once at
//! process start, and every operation returns a typed verdict instead of
//! panicking or throwing, so callers can branch on the outcome (for example
//! to pick a redirect target).

pub mod association;
pub mod config;
pub mod federated;
pub mod flows;
pub mod gateway;
pub mod lifecycle;
pub mod password;
pub mod redirect;
pub mod repository;
pub mod secret;
pub mod session;
pub mod signed_state;
pub mod testing;
pub mod token;

pub use config::AuthConfig;
pub use lifecycle::{CodeConfirmError, SessionManager, SessionValidateError};
pub use redirect::ClientSurface;
pub use session::{ExternalProvider, SessionId, SessionKind, UserId};
