//! Cache-first session and token management.
//!
//! Live sessions are held in a [`cache::Cache`] (in-memory or Redis). A
//! relational database keeps a best-effort history of every session. See
//! [`session::SessionService`] for the lifecycle operations.

pub mod cache;
pub mod config;
pub mod db;
pub mod events;
pub mod observability;
pub mod persistence;
pub mod session;
pub mod tokens;
pub mod users;

pub use session::{SessionError, SessionResult, SessionService};
