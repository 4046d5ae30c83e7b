use anyhow::{bail, Error};
use ndarray::ArrayView2;
use sprs::{CsMat, TriMat};
use std::collections::HashMap;

/// Normalized expression values, genes (rows) by cells (columns), stored gene-major (CSR).
#[derive(Clone, Debug)]
pub struct ExpressionMatrix {
    pub name: String,
    pub barcodes: Vec<String>,
    pub feature_ids: Vec<String>,
    pub feature_names: Vec<String>,
    pub matrix: CsMat<f64>,
}

impl ExpressionMatrix {
    /// Wrap a sparse matrix with its gene and cell identifiers. Values must be finite and
    /// non-negative; CSC input is converted to CSR.
    pub fn new(
        name: String,
        barcodes: Vec<String>,
        feature_ids: Vec<String>,
        feature_names: Vec<String>,
        matrix: CsMat<f64>,
    ) -> Result<ExpressionMatrix, Error> {
        let (rows, cols) = matrix.shape();
        if rows == 0 || cols == 0 {
            bail!("expression matrix is empty ({} genes x {} cells)", rows, cols);
        }
        if feature_ids.len() != rows || feature_names.len() != rows {
            bail!(
                "matrix has {} genes but {} feature ids and {} feature names",
                rows,
                feature_ids.len(),
                feature_names.len()
            );
        }
        if barcodes.len() != cols {
            bail!("matrix has {} cells but {} barcodes", cols, barcodes.len());
        }
        if let Some(v) = matrix.data().iter().find(|v| !v.is_finite() || **v < 0.0) {
            bail!("expression values must be finite and non-negative, found {}", v);
        }
        let matrix = if matrix.is_csr() { matrix } else { matrix.to_csr() };
        Ok(ExpressionMatrix {
            name,
            barcodes,
            feature_ids,
            feature_names,
            matrix,
        })
    }

    /// Build from a dense genes x cells array, naming genes `gene_<i>` and cells `cell_<j>`.
    pub fn from_dense(dense: ArrayView2<f64>) -> Result<ExpressionMatrix, Error> {
        let (rows, cols) = dense.dim();
        let feature_ids = (0..rows).map(|i| format!("gene_{i}")).collect::<Vec<_>>();
        let barcodes = (0..cols).map(|j| format!("cell_{j}")).collect();
        ExpressionMatrix::from_dense_named(String::new(), barcodes, feature_ids.clone(), feature_ids, dense)
    }

    /// Build from a dense genes x cells array with explicit identifiers.
    pub fn from_dense_named(
        name: String,
        barcodes: Vec<String>,
        feature_ids: Vec<String>,
        feature_names: Vec<String>,
        dense: ArrayView2<f64>,
    ) -> Result<ExpressionMatrix, Error> {
        let mut tri = TriMat::new(dense.dim());
        for ((r, c), &v) in dense.indexed_iter() {
            if v != 0.0 {
                tri.add_triplet(r, c, v);
            }
        }
        let matrix: CsMat<f64> = tri.to_csr();
        ExpressionMatrix::new(name, barcodes, feature_ids, feature_names, matrix)
    }

    pub fn num_genes(&self) -> usize {
        self.matrix.rows()
    }

    pub fn num_cells(&self) -> usize {
        self.matrix.cols()
    }

    /// Column index of every barcode.
    pub fn barcode_index(&self) -> HashMap<&str, usize> {
        self.barcodes
            .iter()
            .enumerate()
            .map(|(i, b)| (b.as_str(), i))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_from_dense() {
        let dense = array![[0.0, 1.5, 0.0], [2.0, 0.0, 3.0]];
        let m = ExpressionMatrix::from_dense(dense.view()).unwrap();
        assert_eq!(m.num_genes(), 2);
        assert_eq!(m.num_cells(), 3);
        assert!(m.matrix.is_csr());
        assert_eq!(m.matrix.nnz(), 3);
        assert_eq!(m.matrix.get(1, 2), Some(&3.0));
        assert_eq!(m.barcodes, vec!["cell_0", "cell_1", "cell_2"]);
        assert_eq!(m.barcode_index()["cell_2"], 2);
    }

    #[test]
    fn test_rejects_bad_input() {
        let negative = array![[0.0, -1.0], [1.0, 1.0]];
        assert!(ExpressionMatrix::from_dense(negative.view()).is_err());

        let nan = array![[f64::NAN, 1.0]];
        assert!(ExpressionMatrix::from_dense(nan.view()).is_err());

        let empty = ndarray::Array2::<f64>::zeros((0, 4));
        let err = ExpressionMatrix::from_dense(empty.view()).unwrap_err();
        assert!(err.to_string().contains("empty"));

        let dense = array![[1.0, 2.0]];
        let res = ExpressionMatrix::from_dense_named(
            "x".to_string(),
            vec!["a".to_string()],
            vec!["g".to_string()],
            vec!["g".to_string()],
            dense.view(),
        );
        assert!(res.unwrap_err().to_string().contains("barcodes"));
    }

    #[test]
    fn test_csc_converted() {
        let mut tri = TriMat::new((2, 2));
        tri.add_triplet(0, 1, 4.0);
        tri.add_triplet(1, 0, 5.0);
        let csc: CsMat<f64> = tri.to_csc();
        let ids = vec!["g0".to_string(), "g1".to_string()];
        let m = ExpressionMatrix::new(
            String::new(),
            vec!["c0".to_string(), "c1".to_string()],
            ids.clone(),
            ids,
            csc,
        )
        .unwrap();
        assert!(m.matrix.is_csr());
        assert_eq!(m.matrix.get(0, 1), Some(&4.0));
    }
}
