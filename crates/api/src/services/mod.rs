//! Application services: pipeline wiring and object storage clients.

pub mod object_storage;
pub mod pipeline;

pub use object_storage::{build_object_storage, HttpObjectStorage, LocalObjectStorage};
pub use pipeline::ExportPipeline;
