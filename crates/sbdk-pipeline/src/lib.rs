//! SBDK Pipeline - stage execution for the dev orchestrator
//!
//! Provides the build executor that:
//! - Runs producer pipelines concurrently (Generate)
//! - Loads the database (Load)
//! - Builds and tests dbt models (Transform, Test)
//! - Converts every collaborator failure into a stage outcome

pub mod collaborators;
pub mod dbt;
pub mod error;
pub mod pipeline;
pub mod runner;
pub mod stage;

// Re-export key types
pub use collaborators::{
    CommandLoader, CommandProducer, DataLoader, DatabaseProbeLoader, EngineReport, LoadReport,
    ProducerPipeline, ProducerReport, TransformEngine,
};
pub use dbt::DbtEngine;
pub use error::{CollaboratorError, Result};
pub use pipeline::StageRunner;
pub use runner::{CommandOutput, CommandRunner};
pub use stage::{CommandSpec, EngineMode};
