use candle_util::candle_core::{Device, Tensor};
use candle_util::candle_data_loader::RowsToTensorVec;
use log::info;
use matrix_util::common_io::file_ext;
use matrix_util::mtx_io::read_mtx_csr;
use matrix_util::traits::IoOps;
use nalgebra_sparse::CsrMatrix;

/// A samples x features matrix read from disk
pub enum InputMatrix {
    Dense(Tensor),
    Sparse(CsrMatrix<f32>),
}

impl RowsToTensorVec for InputMatrix {
    fn num_rows(&self) -> usize {
        match self {
            InputMatrix::Dense(x) => x.num_rows(),
            InputMatrix::Sparse(x) => x.num_rows(),
        }
    }

    fn num_cols(&self) -> usize {
        match self {
            InputMatrix::Dense(x) => x.num_cols(),
            InputMatrix::Sparse(x) => x.num_cols(),
        }
    }

    fn rows_to_tensor_vec(&self) -> candle_util::candle_core::Result<Vec<Tensor>> {
        match self {
            InputMatrix::Dense(x) => x.rows_to_tensor_vec(),
            InputMatrix::Sparse(x) => x.rows_to_tensor_vec(),
        }
    }

    fn to_tensor_on(&self, dev: &Device) -> candle_util::candle_core::Result<Tensor> {
        match self {
            InputMatrix::Dense(x) => x.to_tensor_on(dev),
            InputMatrix::Sparse(x) => x.to_tensor_on(dev),
        }
    }
}

/// Read a samples x features matrix
///
/// * `file` - delimited text (`.csv`, `.tsv`, or whitespace separated;
///   optionally gzipped) or, if `sparse`, a MatrixMarket file
/// * `sparse` - read MatrixMarket triplets (rows = samples)
pub fn read_input_matrix(file: &str, sparse: bool) -> anyhow::Result<InputMatrix> {
    let ret = if sparse {
        InputMatrix::Sparse(read_mtx_csr(file)?)
    } else {
        let x = match file_ext(file).ok().as_deref() {
            Some("csv") => Tensor::read_file_delim(file, ",", None)?,
            Some("tsv") => Tensor::read_file_delim(file, "\t", None)?,
            _ => Tensor::read_file_delim(file, &[' ', '\t'], None)?,
        };
        InputMatrix::Dense(x)
    };
    info!(
        "read {} x {} {} matrix from {}",
        ret.num_rows(),
        ret.num_cols(),
        if sparse { "sparse" } else { "dense" },
        file
    );
    Ok(ret)
}
