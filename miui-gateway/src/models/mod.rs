pub mod claude;
pub mod error;
pub mod openai;
pub mod responses;
