//! Domain layer for the inventory export service.
//!
//! This crate contains:
//! - Domain models (ExportJob, ExportTask, inventory records)
//! - Collaborator traits (job store, task channel, data source, storage)
//! - The export pipeline services and their in-memory backends

pub mod models;
pub mod services;
