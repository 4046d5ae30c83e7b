use anyhow::{bail, format_err, Error};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::{self, Display};
use std::str::FromStr;

/// A cluster name. Integer labels order numerically and come before string labels, which
/// order lexicographically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(untagged))]
pub enum ClusterLabel {
    Int(i64),
    Name(String),
}

impl FromStr for ClusterLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty cluster label");
        }
        // only canonical integers, so "01" and "+1" stay distinct from "1"
        Ok(match s.parse::<i64>() {
            Ok(v) if v.to_string() == s => ClusterLabel::Int(v),
            _ => ClusterLabel::Name(s.to_string()),
        })
    }
}

impl Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Int(v) => write!(f, "{v}"),
            ClusterLabel::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ClusterLabel {
    fn from(v: i64) -> Self {
        ClusterLabel::Int(v)
    }
}

impl From<&str> for ClusterLabel {
    fn from(s: &str) -> Self {
        ClusterLabel::Name(s.to_string())
    }
}

/// Mapping from cell barcode to cluster label, kept in insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterAssignment<L = ClusterLabel> {
    barcodes: Vec<String>,
    labels: Vec<L>,
}

impl<L: Ord + Clone> ClusterAssignment<L> {
    pub fn new(barcodes: Vec<String>, labels: Vec<L>) -> Result<ClusterAssignment<L>, Error> {
        if barcodes.len() != labels.len() {
            bail!(
                "assignment has {} barcodes but {} labels",
                barcodes.len(),
                labels.len()
            );
        }
        let mut seen = HashSet::with_capacity(barcodes.len());
        if let Some(dup) = barcodes.iter().find(|b| !seen.insert(b.as_str())) {
            return Err(format_err!("barcode {} assigned more than once", dup));
        }
        Ok(ClusterAssignment { barcodes, labels })
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, L)>) -> Result<ClusterAssignment<L>, Error> {
        let (barcodes, labels) = pairs.into_iter().unzip();
        ClusterAssignment::new(barcodes, labels)
    }

    pub fn barcodes(&self) -> &[String] {
        &self.barcodes
    }

    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &L)> + '_ {
        self.barcodes.iter().map(String::as_str).zip(self.labels.iter())
    }

    pub fn get(&self, barcode: &str) -> Option<&L> {
        self.barcodes.iter().position(|b| b == barcode).map(|i| &self.labels[i])
    }

    /// Distinct labels in sorted order.
    pub fn distinct_labels(&self) -> Vec<L> {
        self.labels
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn num_clusters(&self) -> usize {
        self.labels.iter().collect::<BTreeSet<_>>().len()
    }

    pub fn cluster_sizes(&self) -> BTreeMap<L, usize> {
        let mut res = BTreeMap::default();
        for l in &self.labels {
            *res.entry(l.clone()).or_insert(0) += 1;
        }
        res
    }

    /// Replace every label, keeping the barcodes.
    pub fn with_labels<M: Ord + Clone>(&self, labels: Vec<M>) -> Result<ClusterAssignment<M>, Error> {
        ClusterAssignment::new(self.barcodes.clone(), labels)
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<L>) {
        (self.barcodes, self.labels)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn barcodes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("bc{i}")).collect()
    }

    #[test]
    fn test_label_order() {
        let mut labels: Vec<ClusterLabel> = ["10", "2", "b", "a", "-1"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        labels.sort();
        let shown = labels.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(shown, vec!["-1", "2", "10", "a", "b"]);
        assert!("  ".parse::<ClusterLabel>().is_err());
        assert_eq!(" 7 ".parse::<ClusterLabel>().unwrap(), ClusterLabel::Int(7));
        assert_eq!("007".parse::<ClusterLabel>().unwrap(), ClusterLabel::from("007"));
        assert_eq!("+1".parse::<ClusterLabel>().unwrap(), ClusterLabel::from("+1"));
    }

    #[test]
    fn test_assignment() {
        let a = ClusterAssignment::new(barcodes(5), vec![3, 1, 3, 2, 3]).unwrap();
        assert_eq!(a.len(), 5);
        assert_eq!(a.num_clusters(), 3);
        assert_eq!(a.distinct_labels(), vec![1, 2, 3]);
        assert_eq!(a.cluster_sizes().into_iter().collect::<Vec<_>>(), vec![(1, 1), (2, 1), (3, 3)]);
        assert_eq!(a.get("bc3"), Some(&2));
        assert_eq!(a.get("missing"), None);

        let b = a.with_labels(vec!["x"; 5]).unwrap();
        assert_eq!(b.num_clusters(), 1);
        assert!(a.with_labels(vec![0; 4]).is_err());
    }

    #[test]
    fn test_assignment_validation() {
        assert!(ClusterAssignment::new(barcodes(3), vec![1, 2]).is_err());
        let dup = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let err = ClusterAssignment::new(dup, vec![1, 1, 2]).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }
}
