// Command line utility for running marker-gene cluster curation

use anyhow::{Context, Error};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::info;
use scan_curate::io::{read_assignment, write_assignment, write_merge_history, write_pair_stats};
use scan_curate::mtx::load_expression_matrix;
use scan_curate::{curate_clusters, relabel_by_size, CurationParams, CurationResult, MarkerParams};
use scan_types::ClusterLabel;
use std::fs::{create_dir_all, File};
use std::io::BufReader;
use std::path::PathBuf;

const DEFAULT_PARAMS: CurationParams = CurationParams {
    markers: MarkerParams {
        expression_threshold: 1.0,
        target_proportion: 0.5,
        other_proportion: 0.1,
    },
    min_marker_genes: 10,
    min_cluster_size: 10,
    max_passes: None,
};

fn command() -> Command {
    Command::new("scan-curate-cmd")
        .about("Merge clusters lacking cells or marker genes until every pair is supported")
        .arg(
            Arg::new("INPUT")
                .help("matrix directory (matrix.mtx.gz, features.tsv.gz, barcodes.tsv.gz)")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CLUSTERS")
                .help("CSV of barcode,cluster with a header row")
                .short('c')
                .long("clusters")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PARAMS")
                .help("JSON file of curation parameters; flags below override its values")
                .short('p')
                .long("params")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("EXPRESSION_THRESHOLD")
                .help("Expression a cell must exceed to detect a gene [default: 1.0]")
                .long("expression_threshold")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("TARGET_PROPORTION")
                .help("Minimum fraction of a cluster detecting its marker [default: 0.5]")
                .long("target_proportion")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("OTHER_PROPORTION")
                .help("Maximum fraction of the other cluster detecting the marker [default: 0.1]")
                .long("other_proportion")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("MIN_MARKER_GENES")
                .help("Merge pairs with fewer markers than this in either direction [default: 10]")
                .long("min_marker_genes")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("MIN_CLUSTER_SIZE")
                .help("Merge pairs whose smaller cluster has fewer cells than this [default: 10]")
                .long("min_cluster_size")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("MAX_PASSES")
                .help("Give up after this many passes [default: number of input clusters]")
                .long("max_passes")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("RELABEL_BY_SIZE")
                .help("Renumber curated clusters 1..n from largest to smallest")
                .long("relabel_by_size")
                .action(ArgAction::SetTrue),
        )
}

fn resolve_params(matches: &ArgMatches) -> Result<CurationParams, Error> {
    let mut params = match matches.get_one::<PathBuf>("PARAMS") {
        Some(path) => {
            let file = File::open(path).with_context(|| path.display().to_string())?;
            serde_json::from_reader(BufReader::new(file)).with_context(|| path.display().to_string())?
        }
        None => DEFAULT_PARAMS,
    };
    if let Some(&v) = matches.get_one::<f64>("EXPRESSION_THRESHOLD") {
        params.markers.expression_threshold = v;
    }
    if let Some(&v) = matches.get_one::<f64>("TARGET_PROPORTION") {
        params.markers.target_proportion = v;
    }
    if let Some(&v) = matches.get_one::<f64>("OTHER_PROPORTION") {
        params.markers.other_proportion = v;
    }
    if let Some(&v) = matches.get_one::<usize>("MIN_MARKER_GENES") {
        params.min_marker_genes = v;
    }
    if let Some(&v) = matches.get_one::<usize>("MIN_CLUSTER_SIZE") {
        params.min_cluster_size = v;
    }
    if let Some(&v) = matches.get_one::<usize>("MAX_PASSES") {
        params.max_passes = Some(v);
    }
    params.validate()?;
    Ok(params)
}

/// Pass summaries, applied merges and terminal pair statistics of one curation run.
fn curation_summary(result: &CurationResult<ClusterLabel>) -> serde_json::Value {
    serde_json::json!({
        "num_clusters": result.num_clusters(),
        "collapsed": result.collapsed,
        "passes": result.passes,
        "merges": result.merges,
        "final_stats": result.final_stats,
    })
}

pub fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = command().get_matches();
    let matrix_dir: &PathBuf = matches.get_one("INPUT").unwrap();
    let clusters_path: &PathBuf = matches.get_one("CLUSTERS").unwrap();
    let out_dir: &PathBuf = matches.get_one("OUT_DIR").unwrap();
    let params = resolve_params(&matches)?;
    info!("curation parameters: {:?}", params);

    let matrix = load_expression_matrix(matrix_dir)?;
    info!(
        "loaded {} genes x {} cells from {}",
        matrix.num_genes(),
        matrix.num_cells(),
        matrix_dir.display()
    );
    let assignment = read_assignment(clusters_path)?;

    let result = curate_clusters(&matrix, &assignment, &params)?;

    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    let curated = if matches.get_flag("RELABEL_BY_SIZE") {
        let labels = relabel_by_size(result.assignment.labels())
            .into_iter()
            .map(|i| ClusterLabel::Int(i as i64 + 1))
            .collect::<Vec<_>>();
        result.assignment.with_labels(labels)?
    } else {
        result.assignment.clone()
    };
    write_assignment(out_dir.join("curated_clusters.csv"), &curated)?;
    write_pair_stats(out_dir.join("pair_stats.csv"), &result.final_stats)?;
    write_merge_history(out_dir.join("merges.csv"), &result.merges)?;
    let summary_path = out_dir.join("curation_summary.json");
    let summary_file = File::create(&summary_path).with_context(|| summary_path.display().to_string())?;
    serde_json::to_writer_pretty(summary_file, &curation_summary(&result))?;

    println!(
        "{} clusters -> {} clusters in {} passes ({} merges){}",
        assignment.num_clusters(),
        curated.num_clusters(),
        result.passes.len(),
        result.merges.len(),
        if result.collapsed { "; all cells collapsed into one cluster" } else { "" }
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use scan_curate::markers::MarkerPairStats;
    use scan_curate::merge_clusters::{MergeDirective, MergeEvent, MergeReason, PassSummary};
    use scan_types::ClusterAssignment;

    #[test]
    fn test_resolve_params() {
        let m = command().try_get_matches_from(["cmd", "dir", "-c", "c.csv"]).unwrap();
        assert_eq!(resolve_params(&m).unwrap(), DEFAULT_PARAMS);

        let m = command()
            .try_get_matches_from([
                "cmd",
                "dir",
                "-c",
                "c.csv",
                "--min_cluster_size",
                "3",
                "--target_proportion",
                "0.8",
                "--max_passes",
                "7",
            ])
            .unwrap();
        let p = resolve_params(&m).unwrap();
        assert_eq!(p.min_cluster_size, 3);
        assert_eq!(p.markers.target_proportion, 0.8);
        assert_eq!(p.max_passes, Some(7));
        assert_eq!(p.min_marker_genes, DEFAULT_PARAMS.min_marker_genes);

        let m = command()
            .try_get_matches_from(["cmd", "dir", "-c", "c.csv", "--other_proportion", "1.5"])
            .unwrap();
        assert!(resolve_params(&m).is_err());
    }

    #[test]
    fn test_params_file_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{"expression_threshold": 2.0, "target_proportion": 0.4, "other_proportion": 0.05,
                "min_marker_genes": 4, "min_cluster_size": 6}"#,
        )
        .unwrap();
        let path_arg = path.display().to_string();
        let m = command()
            .try_get_matches_from(["cmd", "dir", "-c", "c.csv", "-p", path_arg.as_str(), "--min_marker_genes", "9"])
            .unwrap();
        let p = resolve_params(&m).unwrap();
        assert_eq!(p.markers.expression_threshold, 2.0);
        assert_eq!(p.min_cluster_size, 6);
        assert_eq!(p.min_marker_genes, 9);
        assert_eq!(p.max_passes, None);
    }

    #[test]
    fn test_curation_summary() {
        let t = ClusterLabel::from("T cells");
        let result = CurationResult {
            assignment: ClusterAssignment::new(
                vec!["AAA-1".to_string(), "CCC-1".to_string(), "GGG-1".to_string()],
                vec![ClusterLabel::Int(1), ClusterLabel::Int(1), t.clone()],
            )
            .unwrap(),
            passes: vec![
                PassSummary {
                    pass: 1,
                    num_clusters: 3,
                    pairs_evaluated: 3,
                    failing_pairs: 1,
                    merges_applied: 1,
                },
                PassSummary {
                    pass: 2,
                    num_clusters: 2,
                    pairs_evaluated: 1,
                    failing_pairs: 0,
                    merges_applied: 0,
                },
            ],
            merges: vec![MergeEvent {
                pass: 1,
                directive: MergeDirective {
                    from: ClusterLabel::Int(4),
                    to: ClusterLabel::Int(1),
                },
                reason: MergeReason::Size,
                min_size: 1,
                min_dex_count: 12,
            }],
            final_stats: vec![MarkerPairStats {
                cl1: ClusterLabel::Int(1),
                cl2: t,
                dex_count_a_to_b: 20,
                dex_count_b_to_a: 15,
                min_dex_count: 15,
                min_size: 1,
            }],
            collapsed: false,
        };
        let v = curation_summary(&result);
        assert_eq!(v["num_clusters"], 2);
        assert_eq!(v["collapsed"], false);
        assert_eq!(v["passes"].as_array().unwrap().len(), 2);
        assert_eq!(v["passes"][0]["merges_applied"], 1);
        assert_eq!(v["merges"][0]["directive"]["from"], 4);
        assert_eq!(v["merges"][0]["reason"], "Size");
        assert_eq!(v["final_stats"][0]["cl2"], "T cells");
        assert_eq!(v["final_stats"][0]["min_dex_count"], 15);
    }
}
