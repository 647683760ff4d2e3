//! HTTP surface of the upload gateway

mod errors;
pub mod handlers;
mod redirect;

pub use errors::UploadFailure;
pub use handlers::{router, AppState};
