//! Stateless divergence-to-distance transforms.
//!
//! Each transform maps an observed divergence (proportion of differing
//! sites) to an evolutionary distance, elementwise over a whole matrix.
//! Domains are checked once, up front, before any math: an out-of-domain
//! divergence fails the whole call with `InvalidInput`, nothing is recovered
//! locally. Rows are transformed in parallel; the tree engine itself stays
//! single-threaded.

use crate::matrix::DistanceMatrix;
use crate::tree::TreeBuildError;
use rayon::prelude::*;

/// Divergence correction applied to the input matrix before tree building.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transform {
    /// Use the matrix as-is.
    None,
    /// Jukes-Cantor four-state nucleotide correction.
    JukesCantor,
    /// Kimura's protein approximation.
    Kimura,
    /// Poisson correction.
    Poisson,
    /// Grishin's rate-heterogeneous correction (numerically inverted).
    Grishin,
}

impl Transform {
    fn name(self) -> &'static str {
        match self {
            Transform::None => "none",
            Transform::JukesCantor => "jukes-cantor",
            Transform::Kimura => "kimura",
            Transform::Poisson => "poisson",
            Transform::Grishin => "grishin",
        }
    }

    /// Largest admissible divergence (exclusive) for this transform.
    fn domain_limit(self) -> f64 {
        match self {
            Transform::None => f64::INFINITY,
            Transform::JukesCantor => 0.75,
            // 1 - p - p^2/5 stays positive below this root.
            Transform::Kimura => (45.0f64.sqrt() - 5.0) / 2.0,
            Transform::Poisson | Transform::Grishin => 1.0,
        }
    }
}

#[inline]
fn jukes_cantor_pair(p: f64) -> f64 {
    -0.75 * (1.0 - 4.0 * p / 3.0).ln()
}

#[inline]
fn poisson_pair(p: f64) -> f64 {
    -(1.0 - p).ln()
}

#[inline]
fn kimura_pair(p: f64) -> f64 {
    -(1.0 - p - 0.2 * p * p).ln()
}

/// Invert `p = ln(1 + 2d) / (2d)` for `d` by Newton iteration.
#[inline]
fn grishin_pair(p: f64) -> f64 {
    if p <= 0.0 {
        return 0.0;
    }
    let mut d = p / (1.0 - p);
    for _ in 0..64 {
        let g = (1.0 + 2.0 * d).ln() - 2.0 * d * p;
        let dg = 2.0 / (1.0 + 2.0 * d) - 2.0 * p;
        let step = g / dg;
        d -= step;
        if step.abs() < 1e-14 {
            break;
        }
    }
    d
}

/// Transform every off-diagonal divergence of `matrix` into a distance.
///
/// # Errors
/// `DivergenceOutOfRange` for the first entry at or beyond the transform's
/// domain limit (e.g. `p >= 1.0` for the Grishin family), reported before
/// any value is computed.
pub fn apply(transform: Transform, matrix: &DistanceMatrix) -> Result<DistanceMatrix, TreeBuildError> {
    if transform == Transform::None {
        return Ok(matrix.clone());
    }
    let n = matrix.n();
    let limit = transform.domain_limit();
    for i in 0..n {
        for j in 0..n {
            if i != j && matrix.get(i, j) >= limit {
                return Err(TreeBuildError::DivergenceOutOfRange {
                    transform: transform.name(),
                    value: matrix.get(i, j),
                    row: i,
                    col: j,
                });
            }
        }
    }
    let rows: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        0.0
                    } else {
                        let p = matrix.get(i, j);
                        match transform {
                            Transform::None => p,
                            Transform::JukesCantor => jukes_cantor_pair(p),
                            Transform::Kimura => kimura_pair(p),
                            Transform::Poisson => poisson_pair(p),
                            Transform::Grishin => grishin_pair(p),
                        }
                    }
                })
                .collect()
        })
        .collect();
    DistanceMatrix::from_rows(rows, matrix.labels().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn divergences(p: f64) -> DistanceMatrix {
        DistanceMatrix::from_rows(
            vec![vec![0.0, p], vec![p, 0.0]],
            vec!["A".to_string(), "B".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn poisson_at_half_is_ln_two() {
        let out = apply(Transform::Poisson, &divergences(0.5)).unwrap();
        assert!((out.get(0, 1) - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn jukes_cantor_known_value() {
        let out = apply(Transform::JukesCantor, &divergences(0.3)).unwrap();
        assert!((out.get(0, 1) - (-0.75 * 0.6f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn kimura_matches_closed_form() {
        let p = 0.4;
        let out = apply(Transform::Kimura, &divergences(p)).unwrap();
        assert!((out.get(0, 1) - (-(1.0 - p - 0.2 * p * p).ln())).abs() < 1e-12);
    }

    #[test]
    fn grishin_inverts_its_forward_map() {
        for p in [0.05, 0.2, 0.5, 0.8] {
            let out = apply(Transform::Grishin, &divergences(p)).unwrap();
            let d = out.get(0, 1);
            let forward = (1.0 + 2.0 * d).ln() / (2.0 * d);
            assert!((forward - p).abs() < 1e-10, "p={p}: d={d}, back={forward}");
        }
    }

    #[test]
    fn saturated_divergence_is_rejected_up_front() {
        let err = apply(Transform::Grishin, &divergences(1.0)).unwrap_err();
        assert!(matches!(
            err,
            TreeBuildError::DivergenceOutOfRange { transform: "grishin", .. }
        ));
        assert!(apply(Transform::JukesCantor, &divergences(0.8)).is_err());
    }

    #[test]
    fn transforms_preserve_symmetry_and_zero_diagonal() {
        let out = apply(Transform::Poisson, &divergences(0.3)).unwrap();
        assert_eq!(out.get(0, 0), 0.0);
        assert_eq!(out.get(0, 1), out.get(1, 0));
    }
}
