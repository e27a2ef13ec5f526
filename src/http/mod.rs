pub mod auth;
pub mod error;
pub mod handlers;
pub mod router;

pub use error::ApiError;
pub use router::build_router;
