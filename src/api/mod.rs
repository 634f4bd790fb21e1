pub mod error;
pub mod etag;
pub mod models;
pub mod ratelimit;
pub mod server;
pub mod services;
pub mod state;
pub mod validation;

pub use error::ApiError;
pub use server::{build_router, run};
pub use state::AppState;
