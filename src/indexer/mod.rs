pub mod chain;
pub mod client;
pub mod decoder;
pub mod extractor;
pub mod reorg;
pub mod types;
