pub mod routes;

pub use routes::{admin_router, ApiError, AppState};
