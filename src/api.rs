//! Python binding layer for tree construction.
//!
//! Exposes the driver over plain Python lists: a square distance matrix and
//! its labels go in, a Newick string comes out.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::avgdist::Scheme;
use crate::engine::{build, BuildConfig, BuildMethod};
use crate::matrix::DistanceMatrix;
use crate::newick::to_newick;
use crate::transforms::{apply, Transform};

fn parse_method(method: &str) -> PyResult<BuildMethod> {
    match method {
        "gme" => Ok(BuildMethod::Gme),
        "bme" => Ok(BuildMethod::Bme),
        "nj" => Ok(BuildMethod::Nj),
        other => Err(PyValueError::new_err(format!(
            "unknown method '{other}' (expected gme, bme or nj)"
        ))),
    }
}

fn parse_scheme(scheme: &str, what: &str) -> PyResult<Scheme> {
    match scheme {
        "ols" => Ok(Scheme::Ols),
        "balanced" => Ok(Scheme::Balanced),
        other => Err(PyValueError::new_err(format!(
            "unknown {what} scheme '{other}' (expected ols or balanced)"
        ))),
    }
}

fn parse_transform(name: &str) -> PyResult<Transform> {
    match name {
        "none" => Ok(Transform::None),
        "jc" => Ok(Transform::JukesCantor),
        "kimura" => Ok(Transform::Kimura),
        "poisson" => Ok(Transform::Poisson),
        "grishin" => Ok(Transform::Grishin),
        other => Err(PyValueError::new_err(format!(
            "unknown transform '{other}'"
        ))),
    }
}

/// Build a tree from a pairwise distance matrix.
///
/// Args:
///     matrix: Square list-of-lists of pairwise distances
///     labels: Taxon names, in matrix row order
///     method: "gme", "bme" or "nj" (default: "bme")
///     refine: "ols", "balanced" or "none" (default: "balanced")
///     weights: "ols" or "balanced" (default: "balanced")
///     transform: divergence correction, "none"/"jc"/"kimura"/"poisson"/"grishin"
///     clamp_negative: zero out negative branch lengths (default: False)
///
/// Returns:
///     The tree as a Newick string.
///
/// Raises:
///     ValueError: for malformed matrices or out-of-domain divergences.
#[pyfunction]
#[pyo3(signature = (matrix, labels, method="bme", refine="balanced", weights="balanced", transform="none", clamp_negative=false))]
fn build_tree(
    matrix: Vec<Vec<f64>>,
    labels: Vec<String>,
    method: &str,
    refine: &str,
    weights: &str,
    transform: &str,
    clamp_negative: bool,
) -> PyResult<String> {
    let d = DistanceMatrix::from_rows(matrix, labels)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let d = apply(parse_transform(transform)?, &d)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let config = BuildConfig {
        method: parse_method(method)?,
        refine: match refine {
            "none" => None,
            other => Some(parse_scheme(other, "refine")?),
        },
        weights: parse_scheme(weights, "weight")?,
        clamp_negative,
        verbose: false,
    };
    let report = build(&d, &config).map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(to_newick(&report.tree))
}

/// Python module definition
#[pymodule]
fn metree(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(build_tree, m)?)?;
    Ok(())
}
