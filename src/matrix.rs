//! Dense pairwise distance matrix with taxon labels.
//!
//! The matrix is immutable input to the builders: row-major `f64`, indexed by
//! original taxon order (`index2`). Validation is done once, up front, before
//! any tree work: entries must be finite, the matrix symmetric, the diagonal
//! zero.

use crate::tree::TreeBuildError;

/// N×N symmetric distance matrix plus the N taxon labels, in input order.
#[derive(Clone, Debug)]
pub struct DistanceMatrix {
    n: usize,
    data: Vec<f64>,
    labels: Vec<String>,
}

impl DistanceMatrix {
    /// Build a matrix from rows and labels.
    ///
    /// # Errors
    /// `SizeMismatch` for ragged rows or label-count disagreement, then the
    /// full [`DistanceMatrix::validate`] checks.
    pub fn from_rows(rows: Vec<Vec<f64>>, labels: Vec<String>) -> Result<Self, TreeBuildError> {
        let n = rows.len();
        if labels.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(TreeBuildError::SizeMismatch {
                size: n,
                labels: labels.len(),
            });
        }
        let matrix = DistanceMatrix {
            n,
            data: rows.into_iter().flatten().collect(),
            labels,
        };
        matrix.validate()?;
        Ok(matrix)
    }

    /// Validate finiteness, symmetry and zero diagonal. Finiteness is checked
    /// first so a NaN is reported as `NonFiniteDistance`, never disguised as
    /// an asymmetry.
    pub fn validate(&self) -> Result<(), TreeBuildError> {
        for i in 0..self.n {
            for j in 0..self.n {
                if !self.get(i, j).is_finite() {
                    return Err(TreeBuildError::NonFiniteDistance { row: i, col: j });
                }
            }
        }
        for i in 0..self.n {
            if self.get(i, i) != 0.0 {
                return Err(TreeBuildError::NonzeroDiagonal(i));
            }
            for j in (i + 1)..self.n {
                if self.get(i, j) != self.get(j, i) {
                    return Err(TreeBuildError::AsymmetricMatrix { row: i, col: j });
                }
            }
        }
        Ok(())
    }

    /// Number of taxa.
    #[inline]
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, i: usize) -> &str {
        &self.labels[i]
    }

    /// Rows view for writers.
    pub fn rows(&self) -> Vec<Vec<f64>> {
        (0..self.n)
            .map(|i| self.data[i * self.n..(i + 1) * self.n].to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_valid_matrix() {
        let m = DistanceMatrix::from_rows(
            vec![
                vec![0.0, 5.0, 9.0],
                vec![5.0, 0.0, 10.0],
                vec![9.0, 10.0, 0.0],
            ],
            labels(&["A", "B", "C"]),
        )
        .unwrap();
        assert_eq!(m.n(), 3);
        assert_eq!(m.get(0, 2), 9.0);
    }

    #[test]
    fn rejects_nan_before_symmetry() {
        let err = DistanceMatrix::from_rows(
            vec![vec![0.0, f64::NAN], vec![1.0, 0.0]],
            labels(&["A", "B"]),
        )
        .unwrap_err();
        assert!(matches!(err, TreeBuildError::NonFiniteDistance { row: 0, col: 1 }));
    }

    #[test]
    fn rejects_asymmetry_and_diagonal() {
        assert!(matches!(
            DistanceMatrix::from_rows(
                vec![vec![0.0, 1.0], vec![2.0, 0.0]],
                labels(&["A", "B"])
            ),
            Err(TreeBuildError::AsymmetricMatrix { .. })
        ));
        assert!(matches!(
            DistanceMatrix::from_rows(
                vec![vec![0.5, 1.0], vec![1.0, 0.0]],
                labels(&["A", "B"])
            ),
            Err(TreeBuildError::NonzeroDiagonal(0))
        ));
    }

    #[test]
    fn rejects_label_mismatch() {
        assert!(matches!(
            DistanceMatrix::from_rows(vec![vec![0.0]], labels(&["A", "B"])),
            Err(TreeBuildError::SizeMismatch { .. })
        ));
    }
}
