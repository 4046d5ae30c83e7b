use anyhow::{bail, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use scan_types::ExpressionMatrix;
use sprs::{CsMat, TriMat};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Open a text file, transparently decompressing it when the name ends in `.gz`.
pub(crate) fn open_text(path: &Path) -> Result<Box<dyn BufRead>, Error> {
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

/// Load a genes x cells CSR matrix from (optionally gzipped) MatrixMarket coordinate format
pub fn load_mtx(path: impl AsRef<Path>) -> Result<CsMat<f64>, Error> {
    let path = path.as_ref();
    let mut mat: Option<TriMat<f64>> = None;

    for (lineno, line) in open_text(path)?.lines().enumerate() {
        let line = line.with_context(|| path.display().to_string())?;
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMat::with_capacity((nrow, ncol), nnz));
            }
            Some(m) => {
                let row = data.next().ok_or_else(|| format_err!("missing ROW"))?.parse::<usize>()?;
                let col = data.next().ok_or_else(|| format_err!("missing COL"))?.parse::<usize>()?;
                let val = data.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<f64>()?;
                if row == 0 || col == 0 || row > m.rows() || col > m.cols() {
                    bail!(
                        "{}:{}: entry ({}, {}) outside a {} x {} matrix",
                        path.display(),
                        lineno + 1,
                        row,
                        col,
                        m.rows(),
                        m.cols()
                    );
                }
                m.add_triplet(row - 1, col - 1, val);
            }
        }
    }

    let Some(matrix) = mat else { bail!("no matrix found in {}", path.display()) };
    Ok(matrix.to_csr())
}

fn read_lines(path: &Path) -> Result<Vec<String>, Error> {
    let mut lines = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line.with_context(|| path.display().to_string())?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

/// Load a Cell Ranger style matrix directory holding `matrix.mtx.gz`, `features.tsv.gz`
/// (id, name, type; tab separated) and `barcodes.tsv.gz`.
pub fn load_expression_matrix(dir: impl AsRef<Path>) -> Result<ExpressionMatrix, Error> {
    let dir = dir.as_ref();
    let matrix = load_mtx(dir.join("matrix.mtx.gz"))?;
    let barcodes = read_lines(&dir.join("barcodes.tsv.gz"))?
        .into_iter()
        .map(|l| l.trim().to_string())
        .collect();
    let (feature_ids, feature_names) = read_lines(&dir.join("features.tsv.gz"))?
        .into_iter()
        .map(|l| {
            let mut fields = l.split('\t');
            let id = fields.next().unwrap_or_default().to_string();
            let name = fields.next().map_or_else(|| id.clone(), ToString::to_string);
            (id, name)
        })
        .unzip();
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    ExpressionMatrix::new(name, barcodes, feature_ids, feature_names, matrix)
        .with_context(|| format!("loading {}", dir.display()))
}
