pub mod chat;
pub mod messages;
pub mod models;
pub mod responses;
pub mod stats;
pub mod streaming_handler;
