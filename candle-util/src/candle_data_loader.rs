use candle_core::{DType, Device, Tensor};
use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;
use rand::prelude::SliceRandom;
use rayon::prelude::*;

/// Matrices whose rows are samples
pub trait RowsToTensorVec {
    fn num_rows(&self) -> usize;

    fn num_cols(&self) -> usize;

    /// one `1 x d` tensor per row, on CPU
    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>>;

    /// the whole matrix as one `n x d` f32 tensor on `dev`
    fn to_tensor_on(&self, dev: &Device) -> candle_core::Result<Tensor> {
        let rows = self.rows_to_tensor_vec()?;
        if rows.is_empty() {
            return Tensor::zeros((0, self.num_cols()), DType::F32, dev);
        }
        Tensor::cat(&rows, 0)?.to_dtype(DType::F32)?.to_device(dev)
    }
}

fn collect_rows<I>(rows: I, ncol: usize) -> candle_core::Result<Vec<Tensor>>
where
    I: ParallelIterator<Item = (usize, Vec<f32>)>,
{
    let mut idx_data = rows
        .map(|(i, row)| Tensor::from_vec(row, (1, ncol), &Device::Cpu).map(|t| (i, t)))
        .collect::<candle_core::Result<Vec<_>>>()?;
    idx_data.sort_by_key(|(i, _)| *i);
    Ok(idx_data.into_iter().map(|(_, t)| t).collect())
}

impl RowsToTensorVec for Array2<f32> {
    fn num_rows(&self) -> usize {
        self.nrows()
    }

    fn num_cols(&self) -> usize {
        self.ncols()
    }

    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>> {
        let rows = self
            .axis_iter(ndarray::Axis(0))
            .enumerate()
            .par_bridge()
            .map(|(i, row)| (i, row.to_vec()));
        collect_rows(rows, self.ncols())
    }
}

impl RowsToTensorVec for DMatrix<f32> {
    fn num_rows(&self) -> usize {
        self.nrows()
    }

    fn num_cols(&self) -> usize {
        self.ncols()
    }

    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>> {
        let rows = self
            .row_iter()
            .enumerate()
            .par_bridge()
            .map(|(i, row)| (i, row.iter().copied().collect::<Vec<f32>>()));
        collect_rows(rows, self.ncols())
    }
}

/// Rows are densified as they are loaded
impl RowsToTensorVec for CsrMatrix<f32> {
    fn num_rows(&self) -> usize {
        self.nrows()
    }

    fn num_cols(&self) -> usize {
        self.ncols()
    }

    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>> {
        let ncol = self.ncols();
        let rows = (0..self.nrows()).into_par_iter().map(|i| {
            let mut dense = vec![0f32; ncol];
            let row = self.row(i);
            for (&j, &v) in row.col_indices().iter().zip(row.values().iter()) {
                dense[j] = v;
            }
            (i, dense)
        });
        collect_rows(rows, ncol)
    }
}

impl RowsToTensorVec for Tensor {
    fn num_rows(&self) -> usize {
        self.dims().first().copied().unwrap_or(0)
    }

    fn num_cols(&self) -> usize {
        self.dims().get(1).copied().unwrap_or(0)
    }

    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>> {
        let x = self.to_device(&Device::Cpu)?;
        (0..self.num_rows()).map(|i| x.narrow(0, i, 1)).collect()
    }
}

/// Consecutive chunks of `batch_size`; a trailing single sample joins
/// the chunk before it, since batch statistics need two rows
fn partition(samples: &[usize], batch_size: usize) -> Vec<Vec<usize>> {
    let mut chunks = samples
        .chunks(batch_size.max(1))
        .map(|c| c.to_vec())
        .collect::<Vec<_>>();
    if batch_size > 1 && chunks.len() > 1 && chunks.last().map(|c| c.len()) == Some(1) {
        if let Some(last) = chunks.pop() {
            if let Some(prev) = chunks.last_mut() {
                prev.extend(last);
            }
        }
    }
    chunks
}

/// Sample indexes partitioned into minibatches
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(samples: Vec<usize>) -> Self {
        Self {
            samples,
            chunks: vec![],
        }
    }

    /// Shuffle and partition; every sample lands in exactly one chunk
    /// and only the last chunk may differ from `batch_size`
    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        let mut rng = rand::rng();
        self.samples.shuffle(&mut rng);
        self.chunks = partition(&self.samples, batch_size);
    }

    /// Partition in the original order
    pub fn ordered_minibatch(&mut self, batch_size: usize) {
        let mut samples = self.samples.clone();
        samples.sort();
        self.chunks = partition(&samples, batch_size);
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }
}

pub struct PairedMinibatch {
    pub x: Tensor,
    pub y: Tensor,
    pub samples: Vec<usize>,
}

///
/// Row-aligned pairs of feature vectors kept in memory. Row `i` of `x`
/// and row `i` of `y` belong to the same sample.
///
pub struct PairedInMemoryData {
    x_data: Vec<Tensor>,
    y_data: Vec<Tensor>,
    minibatches: Minibatches,
}

impl PairedInMemoryData {
    pub fn new<X, Y>(x: &X, y: &Y) -> anyhow::Result<Self>
    where
        X: RowsToTensorVec + ?Sized,
        Y: RowsToTensorVec + ?Sized,
    {
        let x_data = x.rows_to_tensor_vec()?;
        let y_data = y.rows_to_tensor_vec()?;
        if x_data.len() != y_data.len() {
            anyhow::bail!(
                "paired data must have the same number of rows: {} vs {}",
                x_data.len(),
                y_data.len()
            );
        }
        let samples = (0..x_data.len()).collect();
        Ok(Self {
            x_data,
            y_data,
            minibatches: Minibatches::new(samples),
        })
    }

    pub fn num_samples(&self) -> usize {
        self.x_data.len()
    }

    /// Split off the last `n - floor(n * (1 - frac))` rows
    pub fn split_validation(mut self, frac: f32) -> (Self, Option<Self>) {
        let n = self.num_samples();
        let split_at = ((n as f64) * (1. - frac as f64)).floor() as usize;
        if split_at >= n {
            return (self, None);
        }
        let x_val = self.x_data.split_off(split_at);
        let y_val = self.y_data.split_off(split_at);
        let val = Self {
            minibatches: Minibatches::new((0..x_val.len()).collect()),
            x_data: x_val,
            y_data: y_val,
        };
        self.minibatches = Minibatches::new((0..split_at).collect());
        (self, Some(val))
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        self.minibatches.shuffle_minibatch(batch_size);
    }

    pub fn ordered_minibatch(&mut self, batch_size: usize) {
        self.minibatches.ordered_minibatch(batch_size);
    }

    pub fn num_minibatch(&self) -> usize {
        self.minibatches.num_chunks()
    }

    /// Stack the rows of chunk `batch_idx` on `target_device`
    pub fn minibatch(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<PairedMinibatch> {
        let samples = self
            .minibatches
            .chunks
            .get(batch_idx)
            .ok_or(anyhow::anyhow!("invalid minibatch index {}", batch_idx))?;

        let take = |data: &[Tensor]| -> candle_core::Result<Tensor> {
            let rows = samples.iter().map(|&i| &data[i]).collect::<Vec<_>>();
            Tensor::cat(&rows, 0)?
                .to_dtype(DType::F32)?
                .to_device(target_device)
        };

        Ok(PairedMinibatch {
            x: take(&self.x_data)?,
            y: take(&self.y_data)?,
            samples: samples.clone(),
        })
    }
}
