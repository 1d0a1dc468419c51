//! REST access to the chat API.

mod client;
mod interceptor;

pub use client::ApiClient;
pub use interceptor::{AuthEvent, CredentialRefresher, REFRESH_PATH};
