pub mod engine;
pub mod filters;

pub use engine::{
    FilterInput, HybridSearch, QueryError, SearchIdentity, SearchOptions, SearchResponse,
    SearchResult,
};
