pub mod hst;
pub mod moments;

// Re-exports for convenience
pub use hst::{PartitionEnsemble, PartitionNode, PartitionTree};
pub use moments::RunningMoments;
