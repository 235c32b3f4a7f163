pub mod api;
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod scraper;
pub mod security;
pub mod session;
pub mod state;
pub mod uploader;

pub use errors::{AppError, AppResult};
pub use state::AppState;
