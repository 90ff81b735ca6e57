//! Ferry API Library
//!
//! HTTP handlers, error rendering and application setup. The binary in `main.rs`
//! only loads configuration and serves the router built here.

mod api_doc;
mod utils;

pub mod auth;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;

pub use api_doc::ApiDoc;
pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
