//! Shared database repository test infrastructure
//!
//! The same test logic runs against both SQLite and PostgreSQL:
//!
//! - **SQLite**: fast, in-memory tests that run with every `cargo test`
//! - **PostgreSQL**: testcontainers-based, run with `cargo test -- --ignored`
//!
//! ```bash
//! cargo test                       # Run fast SQLite tests only
//! cargo test -- --ignored          # Run PostgreSQL and Redis integration tests (requires Docker)
//! cargo test -- --include-ignored  # Run all tests
//! ```
