pub mod parser;
pub mod request_options;
pub mod streaming;
