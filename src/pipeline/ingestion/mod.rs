// Pipeline ingestion: flat-file exports into typed in-memory tables

pub mod schema;
pub mod source_reader;

pub use source_reader::SourceReader;
