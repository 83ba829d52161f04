pub mod http;
pub mod mock;

pub use http::{HttpAdapterConfig, HttpGenerationClient};
