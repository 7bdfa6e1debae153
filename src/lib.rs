//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `tree`: arena-based node/edge/tree model and ownership rules.
//! - `traverse`: restartable post-/pre-order edge cursors.
//! - `heap`: indexed priority heap addressable by edge identity.
//! - `matrix`: validated pairwise distance matrix input.
//! - `avgdist`: incrementally-maintained subtree average-distance table.
//! - `insert`: sequential minimum-evolution builders (GME / BME).
//! - `nni`: NNI / balanced-NNI topology refinement.
//! - `weights`: closed-form branch-length assignment.
//! - `nj`: Neighbor-Joining alternative builder.
//! - `engine`: top-level `build` driver and configuration.
//! - `transforms`: divergence-to-distance corrections.
//! - `newick`: Newick text and `phylotree` container conversion.
//! - `io`: PHYLIP matrix reading, TSV writing.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod avgdist;
pub mod engine;
pub mod heap;
pub mod insert;
pub mod io;
pub mod matrix;
pub mod newick;
pub mod nj;
pub mod nni;
pub mod transforms;
pub mod traverse;
pub mod tree;
pub mod weights;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use avgdist::{AverageTable, Scheme};
pub use engine::{build, BuildConfig, BuildMethod, BuildReport};
pub use matrix::DistanceMatrix;
pub use newick::{from_newick, to_newick, to_phylo};
pub use nj::build_nj;
pub use transforms::Transform;
pub use tree::{EdgeId, NodeId, Tree, TreeBuildError};
