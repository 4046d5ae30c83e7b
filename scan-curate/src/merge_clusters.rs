use crate::detection::{cell_columns, check_matrix, DetectionTable};
use crate::markers::{pair_stats, MarkerPairStats};
use crate::params::CurationParams;
use anyhow::{bail, Error};
use log::{debug, info, warn};
use scan_types::{ClusterAssignment, ExpressionMatrix};
use sprs::CsMat;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Which threshold a pair of clusters failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MergeReason {
    /// the smaller cluster has fewer than `min_cluster_size` cells
    Size,
    /// fewer than `min_marker_genes` markers in at least one direction
    Markers,
    SizeAndMarkers,
}

impl MergeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeReason::Size => "size",
            MergeReason::Markers => "markers",
            MergeReason::SizeAndMarkers => "size+markers",
        }
    }
}

/// Return the reason `stats` fails the curation thresholds, or `None` if the pair passes.
pub fn pair_failure<L>(stats: &MarkerPairStats<L>, params: &CurationParams) -> Option<MergeReason> {
    let small = stats.min_size < params.min_cluster_size;
    let few_markers = stats.min_dex_count < params.min_marker_genes;
    match (small, few_markers) {
        (true, true) => Some(MergeReason::SizeAndMarkers),
        (true, false) => Some(MergeReason::Size),
        (false, true) => Some(MergeReason::Markers),
        (false, false) => None,
    }
}

/// All cells labelled `from` are relabelled `to`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MergeDirective<L> {
    pub from: L,
    pub to: L,
}

/// A merge applied during curation, with the statistics of the pair that triggered it.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MergeEvent<L> {
    pub pass: usize,
    pub directive: MergeDirective<L>,
    pub reason: MergeReason,
    pub min_size: usize,
    pub min_dex_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PassSummary {
    /// 1-based
    pub pass: usize,
    pub num_clusters: usize,
    pub pairs_evaluated: usize,
    pub failing_pairs: usize,
    pub merges_applied: usize,
}

/// Outcome of `curate_clusters`.
#[derive(Clone, Debug)]
pub struct CurationResult<L> {
    pub assignment: ClusterAssignment<L>,
    pub passes: Vec<PassSummary>,
    pub merges: Vec<MergeEvent<L>>,
    /// Pair statistics of the terminal pass, every entry of which passes the thresholds.
    /// Empty when fewer than two clusters remain.
    pub final_stats: Vec<MarkerPairStats<L>>,
    /// Curation merged two or more clusters into one. Valid output, but usually a sign the
    /// thresholds need review.
    pub collapsed: bool,
}

impl<L: Ord + Clone> CurationResult<L> {
    pub fn num_clusters(&self) -> usize {
        self.assignment.num_clusters()
    }
}

/// Merges applied within one pass. Each absorbed label points at the label that absorbed it;
/// surviving labels have no entry. Directives arrive in sorted pair order, so an absorbed label
/// never holds other absorbed labels and the map stays one level deep.
struct PassMerges<L> {
    parent: BTreeMap<L, L>,
}

impl<L: Ord + Clone> PassMerges<L> {
    fn new() -> Self {
        PassMerges {
            parent: BTreeMap::new(),
        }
    }

    fn resolve(&self, label: &L) -> L {
        self.parent.get(label).unwrap_or(label).clone()
    }

    /// Fold `from` into `to`. A directive naming a label that was already absorbed earlier in
    /// the pass has no effect, since no cells remain under that label; the pair is evaluated
    /// again on the next pass.
    fn merge(&mut self, from: &L, to: &L) -> Option<MergeDirective<L>> {
        if from == to || self.parent.contains_key(from) || self.parent.contains_key(to) {
            return None;
        }
        self.parent.insert(from.clone(), to.clone());
        Some(MergeDirective {
            from: from.clone(),
            to: to.clone(),
        })
    }

    fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

fn num_distinct<L: Ord>(labels: &[L]) -> usize {
    labels.iter().collect::<BTreeSet<_>>().len()
}

struct Curation<L> {
    labels: Vec<L>,
    passes: Vec<PassSummary>,
    merges: Vec<MergeEvent<L>>,
    final_stats: Vec<MarkerPairStats<L>>,
}

/// Fixed-point iteration: compute pair statistics on the current labels, merge every failing
/// pair `cl2 -> cl1` in enumeration order, repeat until a pass finds no failing pair.
fn run_curation<L>(
    matrix: &CsMat<f64>,
    cells: &[usize],
    mut labels: Vec<L>,
    params: &CurationParams,
) -> Result<Curation<L>, Error>
where
    L: Ord + Clone + Debug + Send + Sync,
{
    let initial_clusters = num_distinct(&labels);
    let max_passes = params.max_passes.unwrap_or_else(|| initial_clusters.max(1));
    let mut passes = Vec::new();
    let mut merges = Vec::new();
    let mut final_stats = Vec::new();

    info!(
        "curating {} clusters over {} cells and {} genes",
        initial_clusters,
        cells.len(),
        matrix.rows()
    );

    loop {
        let num_clusters = num_distinct(&labels);
        if num_clusters < 2 {
            break;
        }
        let pass = passes.len() + 1;
        if pass > max_passes {
            bail!(
                "cluster curation did not converge within {} passes ({} clusters remain)",
                max_passes,
                num_clusters
            );
        }

        let table = DetectionTable::compute(matrix, cells, &labels, params.markers.expression_threshold)?;
        let stats = pair_stats(&table, &params.markers);
        let failing = stats
            .iter()
            .filter_map(|s| pair_failure(s, params).map(|reason| (s, reason)))
            .collect::<Vec<_>>();

        let mut pass_merges = PassMerges::new();
        for &(s, reason) in &failing {
            match pass_merges.merge(&s.cl2, &s.cl1) {
                Some(directive) => {
                    debug!(
                        "pass {}: merging cluster {:?} into {:?} ({}, min size {}, min markers {})",
                        pass,
                        directive.from,
                        directive.to,
                        reason.as_str(),
                        s.min_size,
                        s.min_dex_count
                    );
                    merges.push(MergeEvent {
                        pass,
                        directive,
                        reason,
                        min_size: s.min_size,
                        min_dex_count: s.min_dex_count,
                    });
                }
                None => debug!(
                    "pass {}: skipping {:?} -> {:?}, a label was already absorbed this pass",
                    pass, s.cl2, s.cl1
                ),
            }
        }

        let summary = PassSummary {
            pass,
            num_clusters,
            pairs_evaluated: stats.len(),
            failing_pairs: failing.len(),
            merges_applied: pass_merges.parent.len(),
        };
        info!(
            "pass {}: {} clusters, {} of {} pairs failing, {} merges",
            pass, summary.num_clusters, summary.failing_pairs, summary.pairs_evaluated, summary.merges_applied
        );
        passes.push(summary);

        if pass_merges.is_empty() {
            final_stats = stats;
            break;
        }
        labels = labels.iter().map(|l| pass_merges.resolve(l)).collect();
    }

    if initial_clusters > 1 && num_distinct(&labels) == 1 {
        warn!(
            "all {} clusters were merged into one; consider relaxing min_cluster_size / min_marker_genes",
            initial_clusters
        );
    }

    Ok(Curation {
        labels,
        passes,
        merges,
        final_stats,
    })
}

/// Iteratively merge clusters that are too small or lack enough marker genes distinguishing
/// them from another cluster. The caller's assignment is left untouched; cells keep their
/// order and the surviving label of each merged group is the smallest label in it.
pub fn curate_clusters<L>(
    matrix: &ExpressionMatrix,
    assignment: &ClusterAssignment<L>,
    params: &CurationParams,
) -> Result<CurationResult<L>, Error>
where
    L: Ord + Clone + Debug + Send + Sync,
{
    params.validate()?;
    if assignment.is_empty() {
        bail!("cluster assignment is empty");
    }
    check_matrix(&matrix.matrix)?;
    let cells = cell_columns(matrix, assignment)?;
    let initial_clusters = assignment.num_clusters();

    let labels = assignment.labels().to_vec();
    let curation = if matrix.matrix.is_csr() {
        run_curation(&matrix.matrix, &cells, labels, params)?
    } else {
        run_curation(&matrix.matrix.to_csr(), &cells, labels, params)?
    };
    let assignment = assignment.with_labels(curation.labels)?;
    let collapsed = initial_clusters > 1 && assignment.num_clusters() == 1;
    info!(
        "curation finished after {} passes: {} -> {} clusters",
        curation.passes.len(),
        initial_clusters,
        assignment.num_clusters()
    );

    Ok(CurationResult {
        assignment,
        passes: curation.passes,
        merges: curation.merges,
        final_stats: curation.final_stats,
        collapsed,
    })
}

/// Curate a plain label vector, one label per matrix column (cell).
pub fn curate_labels<L>(matrix: &CsMat<f64>, labels: Vec<L>, params: &CurationParams) -> Result<Vec<L>, Error>
where
    L: Ord + Clone + Debug + Send + Sync,
{
    params.validate()?;
    check_matrix(matrix)?;
    if labels.len() != matrix.cols() {
        bail!(
            "{} labels supplied for a matrix with {} cells",
            labels.len(),
            matrix.cols()
        );
    }
    let cells = (0..labels.len()).collect::<Vec<_>>();
    let curation = if matrix.is_csr() {
        run_curation(matrix, &cells, labels, params)?
    } else {
        run_curation(&matrix.to_csr(), &cells, labels, params)?
    };
    Ok(curation.labels)
}

/// Relabel a clustering from greatest cluster size to least, as `0, 1, ...`. Ties keep
/// label order.
pub fn relabel_by_size<L: Ord>(labels: &[L]) -> Vec<usize> {
    let mut hist = BTreeMap::<&L, usize>::default();
    for l in labels {
        *hist.entry(l).or_insert(0) += 1;
    }
    let mut hist = hist.into_iter().collect::<Vec<_>>();
    hist.sort_by(|(_, x), (_, y)| y.cmp(x));
    let map = hist
        .into_iter()
        .enumerate()
        .map(|(i, (l, _))| (l, i))
        .collect::<BTreeMap<_, _>>();
    labels.iter().map(|l| map[l]).collect()
}
