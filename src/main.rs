use clap::{Parser, ValueEnum};
use metree::engine::{build, BuildConfig, BuildMethod};
use metree::io::{read_phylip_matrix, write_newick};
use metree::newick::to_newick;
use metree::transforms::{apply, Transform};
use metree::Scheme;
use std::path::PathBuf;
use std::time::Instant;

/// Build an unrooted phylogenetic tree from a PHYLIP distance matrix and
/// write it as a Newick string.
#[derive(Parser, Debug)]
#[command(name = "metree", version, about = "Minimum-evolution tree construction from distance matrices")]
struct Args {
    /// Path to a PHYLIP square distance matrix (optionally .gz)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output path for the Newick tree ('-' for stdout)
    #[arg(short = 'o', long = "output", default_value = "-")]
    output: PathBuf,

    /// Initial tree construction method
    #[arg(short = 'm', long = "method", value_enum, default_value_t = MethodArg::Bme)]
    method: MethodArg,

    /// Topology refinement scheme
    #[arg(short = 'r', long = "refine", value_enum, default_value_t = RefineArg::Balanced)]
    refine: RefineArg,

    /// Branch length scheme
    #[arg(short = 'w', long = "weights", value_enum, default_value_t = SchemeArg::Balanced)]
    weights: SchemeArg,

    /// Divergence correction applied before building
    #[arg(long = "transform", value_enum, default_value_t = TransformArg::None)]
    transform: TransformArg,

    /// Zero out negative branch lengths in the output
    #[arg(long = "clamp-negative", default_value_t = false)]
    clamp_negative: bool,

    /// Quiet mode: suppresses progress messages on stdout
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MethodArg { Gme, Bme, Nj }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RefineArg { Ols, Balanced, None }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SchemeArg { Ols, Balanced }

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TransformArg { None, Jc, Kimura, Poisson, Grishin }

fn main() {
    let args = Args::parse();

    let t0 = Instant::now();
    let matrix = match read_phylip_matrix(&args.input) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Failed to read {:?}: {e}", args.input);
            std::process::exit(2);
        }
    };
    log_if(!args.quiet, format!(
        "Read {} taxa in {:.3}s",
        matrix.n(),
        t0.elapsed().as_secs_f64()
    ));

    let transform = match args.transform {
        TransformArg::None => Transform::None,
        TransformArg::Jc => Transform::JukesCantor,
        TransformArg::Kimura => Transform::Kimura,
        TransformArg::Poisson => Transform::Poisson,
        TransformArg::Grishin => Transform::Grishin,
    };
    let matrix = match apply(transform, &matrix) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Transform failed: {e}");
            std::process::exit(2);
        }
    };

    let config = BuildConfig {
        method: match args.method {
            MethodArg::Gme => BuildMethod::Gme,
            MethodArg::Bme => BuildMethod::Bme,
            MethodArg::Nj => BuildMethod::Nj,
        },
        refine: match args.refine {
            RefineArg::Ols => Some(Scheme::Ols),
            RefineArg::Balanced => Some(Scheme::Balanced),
            RefineArg::None => None,
        },
        weights: match args.weights {
            SchemeArg::Ols => Scheme::Ols,
            SchemeArg::Balanced => Scheme::Balanced,
        },
        clamp_negative: args.clamp_negative,
        verbose: false,
    };

    let t1 = Instant::now();
    let report = match build(&matrix, &config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Tree construction failed: {e}");
            std::process::exit(3);
        }
    };
    log_if(!args.quiet, format!(
        "Built tree in {:.3}s ({} refinement swaps, total length {})",
        t1.elapsed().as_secs_f64(),
        report.nni_swaps,
        report.tree.weight
    ));

    let newick = to_newick(&report.tree);
    if let Err(e) = write_newick(&args.output, &newick) {
        eprintln!("Failed to write output {:?}: {e}", args.output);
        std::process::exit(4);
    }
}

fn log_if(show: bool, msg: String) {
    if show {
        println!("{}", msg);
    }
}
