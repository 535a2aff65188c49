// Data processing pipeline: ingestion, processing, storage and publishing

pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod publish;
pub mod storage;

// Re-export key types from each stage
pub use ingestion::SourceReader;
pub use orchestrator::{Pipeline, PipelineFailure, RunReport, Stage};
pub use processing::{FactDerivation, FactKind, FactSet, Normalizer};
pub use publish::{PublishReport, TableLoad, WarehouseTarget};
