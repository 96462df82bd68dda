// Upstream research provider

pub mod perplexity;
pub mod provider;

pub use perplexity::PerplexityClient;
pub use provider::*;
