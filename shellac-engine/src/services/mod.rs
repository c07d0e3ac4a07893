//! Pipeline services

pub mod analyzer;
pub mod checkpointer;
pub mod corruption_filter;
pub mod discovery;
pub mod duplicate_grouper;
pub mod organizer;
pub mod quality_scorer;
pub mod rejection_manifest;
pub mod transaction_manager;
pub mod workflow_orchestrator;

pub use analyzer::FileAnalyzer;
pub use checkpointer::Checkpointer;
pub use corruption_filter::CorruptionFilter;
pub use discovery::DiscoveryProducer;
pub use duplicate_grouper::DuplicateGrouper;
pub use organizer::Organizer;
pub use rejection_manifest::RejectionManifest;
pub use transaction_manager::TransactionManager;
