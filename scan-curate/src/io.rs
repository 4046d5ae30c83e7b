//! CSV input and output for cluster assignments and curation reports

use crate::markers::MarkerPairStats;
use crate::merge_clusters::MergeEvent;
use crate::mtx::open_text;
use anyhow::{format_err, Context, Error};
use flate2::write::GzEncoder;
use flate2::Compression;
use scan_types::{ClusterAssignment, ClusterLabel};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn create_text(path: &Path) -> Result<Box<dyn Write>, Error> {
    let file = BufWriter::new(File::create(path).with_context(|| path.display().to_string())?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Box::new(file))
    }
}

/// Read a `barcode,cluster` CSV with a header row, as written by Cell Ranger's `clusters.csv`.
pub fn read_assignment(path: impl AsRef<Path>) -> Result<ClusterAssignment, Error> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(open_text(path)?);
    let mut pairs = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| path.display().to_string())?;
        let line = i + 2;
        let barcode = record
            .get(0)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| format_err!("{}:{}: missing barcode", path.display(), line))?;
        let label = record
            .get(1)
            .ok_or_else(|| format_err!("{}:{}: missing cluster", path.display(), line))?
            .parse::<ClusterLabel>()
            .with_context(|| format!("{}:{}", path.display(), line))?;
        pairs.push((barcode.to_string(), label));
    }
    ClusterAssignment::from_pairs(pairs).with_context(|| path.display().to_string())
}

pub fn write_assignment<L: Ord + Clone + Display>(
    path: impl AsRef<Path>,
    assignment: &ClusterAssignment<L>,
) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(create_text(path.as_ref())?);
    writer.write_record(["Barcode", "Cluster"])?;
    for (barcode, label) in assignment.iter() {
        writer.write_record([barcode.to_string(), label.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per cluster pair.
pub fn write_pair_stats<L: Display>(path: impl AsRef<Path>, stats: &[MarkerPairStats<L>]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(create_text(path.as_ref())?);
    writer.write_record([
        "cl1",
        "cl2",
        "dex.count.AtoB",
        "dex.count.BtoA",
        "min.dex.count",
        "min.size",
    ])?;
    for s in stats {
        writer.write_record([
            s.cl1.to_string(),
            s.cl2.to_string(),
            s.dex_count_a_to_b.to_string(),
            s.dex_count_b_to_a.to_string(),
            s.min_dex_count.to_string(),
            s.min_size.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per applied merge, in the order merges were applied.
pub fn write_merge_history<L: Display>(path: impl AsRef<Path>, merges: &[MergeEvent<L>]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_writer(create_text(path.as_ref())?);
    writer.write_record(["pass", "from", "to", "reason", "min.size", "min.dex.count"])?;
    for m in merges {
        writer.write_record([
            m.pass.to_string(),
            m.directive.from.to_string(),
            m.directive.to.to_string(),
            m.reason.as_str().to_string(),
            m.min_size.to_string(),
            m.min_dex_count.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::merge_clusters::{MergeDirective, MergeReason};

    #[test]
    fn test_assignment_csv() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["clusters.csv", "clusters.csv.gz"] {
            let path = dir.path().join(name);
            let a = ClusterAssignment::new(
                vec!["AAA-1".to_string(), "CCC-1".to_string(), "GGG-1".to_string()],
                vec![ClusterLabel::Int(2), ClusterLabel::Name("T cells".to_string()), ClusterLabel::Int(10)],
            )
            .unwrap();
            write_assignment(&path, &a).unwrap();
            assert_eq!(read_assignment(&path).unwrap(), a);
        }
    }

    #[test]
    fn test_assignment_labels_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusters.csv");
        std::fs::write(&path, "Barcode,Cluster\nA,1\nB,01\nC,+1\nD,007\n").unwrap();
        let a = read_assignment(&path).unwrap();
        assert_eq!(a.num_clusters(), 4);
        assert_eq!(a.get("A"), Some(&ClusterLabel::Int(1)));

        let out = dir.path().join("out.csv");
        write_assignment(&out, &a).unwrap();
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "Barcode,Cluster\nA,1\nB,01\nC,+1\nD,007\n"
        );
    }

    #[test]
    fn test_read_assignment_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.csv");
        std::fs::write(&path, "Barcode,Cluster\nA,1\nA,2\n").unwrap();
        assert!(read_assignment(&path).is_err());

        let path = dir.path().join("blank.csv");
        std::fs::write(&path, "Barcode,Cluster\nA,1\nB, \n").unwrap();
        let err = format!("{:#}", read_assignment(&path).unwrap_err());
        assert!(err.contains("blank.csv:3"));

        let path = dir.path().join("short.csv");
        std::fs::write(&path, "Barcode,Cluster\nA,1\nB\n").unwrap();
        assert!(read_assignment(&path).is_err());
    }

    #[test]
    fn test_reports() {
        let dir = tempfile::tempdir().unwrap();
        let stats = vec![MarkerPairStats {
            cl1: 1,
            cl2: 4,
            dex_count_a_to_b: 12,
            dex_count_b_to_a: 3,
            min_dex_count: 3,
            min_size: 40,
        }];
        let path = dir.path().join("pairs.csv");
        write_pair_stats(&path, &stats).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "cl1,cl2,dex.count.AtoB,dex.count.BtoA,min.dex.count,min.size\n1,4,12,3,3,40\n"
        );

        let merges = vec![MergeEvent {
            pass: 1,
            directive: MergeDirective { from: 4, to: 1 },
            reason: MergeReason::Markers,
            min_size: 40,
            min_dex_count: 3,
        }];
        let path = dir.path().join("merges.csv");
        write_merge_history(&path, &merges).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "pass,from,to,reason,min.size,min.dex.count\n1,4,1,markers,40,3\n"
        );
    }
}
