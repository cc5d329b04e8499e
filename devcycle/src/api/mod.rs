pub mod client;
pub mod common;
pub mod environments;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod oauth;
pub mod projects;
pub mod variables;

pub use client::{Client, RetryConfig};
pub use error::ApiError;
pub use evaluation::{EvaluationClient, EvaluationUser};
pub use oauth::OAuthClient;

pub const DEFAULT_API_URL: &str = "https://api.devcycle.com";
