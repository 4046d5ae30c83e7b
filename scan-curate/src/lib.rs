//! # scan-curate: marker-gene based cluster curation for single cell data

/// Per-gene, per-cluster detection counts
pub mod detection;

/// CSV input and output
pub mod io;

/// Directional marker-gene counting between cluster pairs
pub mod markers;

/// Iterative merging of clusters lacking size or marker support
pub mod merge_clusters;

/// MTX loading routines
pub mod mtx;

/// Curation thresholds
pub mod params;

pub use markers::{count_marker_genes, MarkerPairStats};
pub use merge_clusters::{curate_clusters, curate_labels, relabel_by_size, CurationResult};
pub use params::{CurationParams, MarkerParams};
