//! HTTP layer: Axum router, handlers, and responses.
//!
//! Public catalog reads, the admin login, and token-protected product and
//! order mutations.

mod auth;
mod error;
mod handlers;
mod responses;
mod state;
mod upload;


pub use handlers::router;
pub use state::AppState;
