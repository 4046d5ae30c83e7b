//! Shared data types for single-cell cluster curation

/// Cluster labels and cell-to-cluster assignments
pub mod assignment;

/// Gene-by-cell expression matrices
pub mod matrix;

pub use assignment::{ClusterAssignment, ClusterLabel};
pub use matrix::ExpressionMatrix;
