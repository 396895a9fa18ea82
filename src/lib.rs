//! SEO Writer: staged long-form article generation over an assistant API.

pub mod api;
pub mod article;
pub mod clock;
pub mod config;
pub mod error;
pub mod llm;
pub mod sanitize;
pub mod search;
pub mod store;
