use crate::common_io::*;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::io::Write;

/// Write the triplets into a MatrixMarket file with 1-based indices
/// * `triplets` - the triplets to write
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[(usize, usize, f32)],
    nrow: usize,
    ncol: usize,
    mtx_file: &str,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(mtx_file)?;

    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, triplets.len())?;

    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Read a matrix market file and return a vector of 0-based triplets
/// `(row, col, val)` with the `(nrow, ncol)` shape
/// * `mtx_file` - Path to the matrix market file
pub fn read_mtx_triplets(
    mtx_file: &str,
) -> anyhow::Result<(Vec<(usize, usize, f32)>, (usize, usize))> {
    let ReadLinesOut { lines, header } =
        read_lines_of_types::<String>(mtx_file, &[' ', '\t'], 0)?;

    if header.len() != 3 {
        return Err(anyhow::anyhow!("failed to parse mtx header in {}", mtx_file));
    }

    let nrow = header[0].parse::<usize>()?;
    let ncol = header[1].parse::<usize>()?;
    let nnz = header[2].parse::<usize>()?;

    fn parse_row_col_val(triplet: &[String]) -> Option<(usize, usize, f32)> {
        if triplet.len() != 3 {
            return None;
        }
        // convert 1-based to 0-based
        let row = triplet[0].parse::<usize>().ok()?.checked_sub(1)?;
        let col = triplet[1].parse::<usize>().ok()?.checked_sub(1)?;
        let val = triplet[2].parse::<f32>().ok()?;
        Some((row, col, val))
    }

    let triplets = lines
        .iter()
        .map(|words| {
            parse_row_col_val(words)
                .filter(|&(r, c, _)| r < nrow && c < ncol)
                .ok_or_else(|| anyhow::anyhow!("bad mtx entry {:?} in {}", words, mtx_file))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if triplets.len() != nnz {
        log::warn!(
            "{}: header says {} non-zero elements, found {}",
            mtx_file,
            nnz,
            triplets.len()
        );
    }

    Ok((triplets, (nrow, ncol)))
}

/// Read a matrix market file into a compressed sparse row matrix;
/// duplicate entries are summed up
/// * `mtx_file` - Path to the matrix market file
pub fn read_mtx_csr(mtx_file: &str) -> anyhow::Result<CsrMatrix<f32>> {
    let (triplets, (nrow, ncol)) = read_mtx_triplets(mtx_file)?;

    let mut coo = CooMatrix::new(nrow, ncol);
    for (r, c, v) in triplets {
        coo.push(r, c, v);
    }
    Ok(CsrMatrix::from(&coo))
}
