pub mod chunker;
pub mod embedding;
pub mod extract;
pub mod field_registry;
pub mod processor;
pub mod single;
