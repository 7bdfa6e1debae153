//! Reading and writing distance matrices.
//!
//! Input is the PHYLIP square format: a taxon count line, then one row per
//! taxon (`label d0 d1 ... dn-1`), free whitespace, rows may wrap. Files
//! ending in `.gz` are decompressed transparently. Output is a labeled TSV
//! matrix, gzip-compressed when the path ends in `.gz`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::matrix::DistanceMatrix;

fn read_to_string<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let p = path.as_ref();
    let file = File::open(p)?;
    let mut content = String::new();
    if p.to_string_lossy().ends_with(".gz") {
        GzDecoder::new(file).read_to_string(&mut content)?;
    } else {
        let mut file = file;
        file.read_to_string(&mut content)?;
    }
    Ok(content)
}

fn bad_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Read a PHYLIP square distance matrix, plain or gzipped.
pub fn read_phylip_matrix<P: AsRef<Path>>(path: P) -> io::Result<DistanceMatrix> {
    let content = read_to_string(path)?;
    parse_phylip(&content)
}

/// Parse PHYLIP square text into a validated matrix.
pub fn parse_phylip(content: &str) -> io::Result<DistanceMatrix> {
    let mut tokens = content.split_whitespace();
    let n: usize = tokens
        .next()
        .ok_or_else(|| bad_data("empty matrix file".to_string()))?
        .parse()
        .map_err(|_| bad_data("first token must be the taxon count".to_string()))?;
    let mut labels = Vec::with_capacity(n);
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        let label = tokens
            .next()
            .ok_or_else(|| bad_data(format!("missing label for row {i}")))?;
        labels.push(label.to_string());
        let mut row = Vec::with_capacity(n);
        for j in 0..n {
            let tok = tokens
                .next()
                .ok_or_else(|| bad_data(format!("row {i} ends after {j} values")))?;
            let value: f64 = tok
                .parse()
                .map_err(|_| bad_data(format!("bad distance '{tok}' at row {i}")))?;
            row.push(value);
        }
        rows.push(row);
    }
    DistanceMatrix::from_rows(rows, labels).map_err(|e| bad_data(e.to_string()))
}

/// Write a labeled matrix as TSV. Paths ending in `.gz` are compressed.
pub fn write_matrix_tsv<P: AsRef<Path>>(path: P, matrix: &DistanceMatrix) -> io::Result<()> {
    let p = path.as_ref();
    let mut out: Box<dyn Write> = if p.to_string_lossy().ends_with(".gz") {
        let f = File::create(p)?;
        Box::new(io::BufWriter::new(GzEncoder::new(f, Compression::default())))
    } else {
        Box::new(io::BufWriter::new(File::create(p)?))
    };

    for name in matrix.labels() {
        write!(&mut out, "\t{name}")?;
    }
    writeln!(&mut out)?;
    for (i, row) in matrix.rows().iter().enumerate() {
        write!(&mut out, "{}", matrix.label(i))?;
        for val in row {
            write!(&mut out, "\t{val}")?;
        }
        writeln!(&mut out)?;
    }
    out.flush()
}

/// Write a Newick string to a file, or to stdout when `path` is `-`.
pub fn write_newick<P: AsRef<Path>>(path: P, newick: &str) -> io::Result<()> {
    let p = path.as_ref();
    if p.as_os_str() == "-" {
        println!("{newick}");
        return Ok(());
    }
    let mut f = File::create(p)?;
    writeln!(f, "{newick}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_square_phylip() {
        let text = "3\nA 0 5 9\nB 5 0 10\nC 9 10 0\n";
        let m = parse_phylip(text).unwrap();
        assert_eq!(m.n(), 3);
        assert_eq!(m.labels(), &["A", "B", "C"]);
        assert_eq!(m.get(1, 2), 10.0);
    }

    #[test]
    fn parses_wrapped_rows() {
        let text = "3\nA 0 5\n9\nB 5 0 10\nC 9 10 0\n";
        let m = parse_phylip(text).unwrap();
        assert_eq!(m.get(0, 2), 9.0);
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(parse_phylip("3\nA 0 5 9\nB 5 0\n").is_err());
        assert!(parse_phylip("").is_err());
        assert!(parse_phylip("x\n").is_err());
    }

    #[test]
    fn rejects_invalid_matrices_with_context() {
        let err = parse_phylip("2\nA 0 nope\nB 1 0\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        // Asymmetric values surface the matrix validation message.
        let err = parse_phylip("2\nA 0 2\nB 1 0\n").unwrap_err();
        assert!(err.to_string().contains("asymmetric"));
    }
}
