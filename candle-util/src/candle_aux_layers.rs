use crate::candle_aux_linear::{glorot_linear, WeightInit};
use candle_core::{Result, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Dropout, Linear, Module, ModuleT, VarBuilder};
use serde::{Deserialize, Serialize};

/// batch normalization: eps 1e-3, running average keeps 0.99 of the past
fn bn_config() -> BatchNormConfig {
    BatchNormConfig {
        eps: 1e-3,
        remove_mean: true,
        affine: false,
        momentum: 0.01,
    }
}

/// affine -> batch norm (centred, no scale) -> relu -> dropout
pub struct DenseBlock {
    linear: Linear,
    bn: BatchNorm,
    beta: Tensor,
    dropout: Dropout,
}

impl DenseBlock {
    /// Will create these variables:
    /// * `linear.weight`, `linear.bias`
    /// * `bn.running_mean`, `bn.running_var`
    /// * `bn.beta` learned shift after normalization
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        dropout_rate: f32,
        init: WeightInit,
        vb: VarBuilder,
    ) -> Result<Self> {
        let linear = glorot_linear(in_dim, out_dim, init, vb.pp("linear"))?;
        let bn = candle_nn::batch_norm(out_dim, bn_config(), vb.pp("bn"))?;
        let beta = vb.get_with_hints(out_dim, "bn.beta", candle_nn::init::ZERO)?;
        Ok(Self {
            linear,
            bn,
            beta,
            dropout: Dropout::new(dropout_rate),
        })
    }

    pub fn kernel(&self) -> &Tensor {
        self.linear.weight()
    }
}

impl ModuleT for DenseBlock {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<Tensor> {
        let h = self.linear.forward(x_nd)?;
        // a single row has no batch variance; normalize with the running
        // statistics and leave them untouched
        let batch_stats = train && h.dim(0)? > 1;
        let h = self.bn.forward_t(&h, batch_stats)?;
        let h = h.broadcast_add(&self.beta)?.relu()?;
        self.dropout.forward_t(&h, train)
    }
}

/// build a stack of `DenseBlock` layers
pub struct DenseStack {
    blocks: Vec<DenseBlock>,
    dim_in: usize,
    dim_out: usize,
}

impl DenseStack {
    /// `in_dim -> widths[0] -> ... -> widths[last]`, each block named
    /// `fc.{j}`
    pub fn new(
        in_dim: usize,
        widths: &[usize],
        dropout_rate: f32,
        init: WeightInit,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut blocks = Vec::with_capacity(widths.len());
        let mut prev_dim = in_dim;
        for (j, &next_dim) in widths.iter().enumerate() {
            blocks.push(DenseBlock::new(
                prev_dim,
                next_dim,
                dropout_rate,
                init,
                vb.pp(format!("fc.{}", j)),
            )?);
            prev_dim = next_dim;
        }
        Ok(Self {
            blocks,
            dim_in: in_dim,
            dim_out: prev_dim,
        })
    }

    pub fn dim_in(&self) -> usize {
        self.dim_in
    }

    pub fn dim_out(&self) -> usize {
        self.dim_out
    }

    pub fn kernels(&self) -> Vec<&Tensor> {
        self.blocks.iter().map(|b| b.kernel()).collect()
    }
}

impl ModuleT for DenseStack {
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = input.clone();
        for block in self.blocks.iter() {
            x = block.forward_t(&x, train)?;
        }
        Ok(x)
    }
}

/// softplus(x) = log(1 + exp(x)), evaluated as
/// max(x, 0) + log(1 + exp(-|x|)) to avoid overflow
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.)?.log()?;
    x.relu()? + tail
}

/// Nonlinearity applied to a decoder's output head
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputActivation {
    /// identity, for real-valued data
    Linear,
    /// non-negative smooth output, for count-like data
    Softplus,
}

impl Module for OutputActivation {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            OutputActivation::Linear => Ok(x.clone()),
            OutputActivation::Softplus => softplus(x),
        }
    }
}
