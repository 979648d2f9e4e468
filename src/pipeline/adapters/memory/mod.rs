//! In-memory adapter implementations for pipeline ports.

mod repository;

pub use repository::InMemoryPipelineRepository;
