//! # MIUI Search SDK for Rust
//!
//! A client for the MIUI browser AI-search assistant. The assistant answers
//! over a newline-delimited event stream; this crate builds the query payload
//! the upstream expects, posts it, and reassembles the streamed answer.
//!
//! ## Features
//!
//! - **Streaming**: fragments are forwarded to a callback as they arrive
//! - **History**: prior turns travel with every query as a gzipped JSON blob
//! - **Type Safety**: strongly typed payloads and errors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use miui_search_sdk::{ClientConfig, ConversationContext, QueryOptions, Result, SearchClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = SearchClient::new(ClientConfig::default())?;
//!     let context = ConversationContext {
//!         oaid: "0123456789abcdef",
//!         mi_id: "1234567890",
//!         conversation_id: "0123456789abcdef1700000000000",
//!         history: &[],
//!     };
//!
//!     let mut print = |fragment: &str| print!("{fragment}");
//!     let answer = client
//!         .query(context, "What is 2 + 2?", QueryOptions::default(), Some(&mut print))
//!         .await?;
//!     println!("\n{} bytes", answer.len());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod errors;
pub mod history;
pub mod stream_parser;
mod types;

pub use client::{ClientConfig, DEFAULT_ENDPOINT, SearchClient, UPSTREAM_MODEL, new_search_id};
pub use errors::{Result, SdkError};
pub use stream_parser::{FragmentSink, parse_event_stream};
pub use types::{
    ConversationContext, IntentionInfo, Message, QueryOptions, QueryPayload, Source, StreamChunk,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ClientConfig, ConversationContext, Message, QueryOptions, Result, SdkError, SearchClient,
    };
}
