//! Message intake: a webhook pipeline that stores customer messages, then analyzes and routes them.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod store;
