pub mod base;
pub mod client;
pub mod configs;
pub mod retry;
pub mod streaming;
pub mod utils;

#[cfg(test)]
pub mod mock;

pub use base::{Provider, RequestOptions, StreamSender};
pub use client::Client;
pub use configs::{ClientConfig, RetryConfig};
pub use streaming::StreamChunk;
