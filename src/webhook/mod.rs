//! Token review webhook for the cluster API server.

pub mod handler;
pub mod types;

pub use handler::{token_review_handler, TokenWebhook};
