//! Shared vocabulary of the incident QA workspace: the data model, the error
//! taxonomy, configuration, collaborator traits and incident ingestion.

pub mod config;
pub mod data_processor;
pub mod error;
pub mod filters;
pub mod snippet;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
