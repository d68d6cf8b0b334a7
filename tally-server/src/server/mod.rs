pub mod error;
pub mod handlers;
pub mod keepalive;
pub mod router;

pub use error::ApiError;
pub use handlers::AppState;
pub use keepalive::KeepAlive;
pub use router::create_router;
