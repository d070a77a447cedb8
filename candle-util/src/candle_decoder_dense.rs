use crate::candle_aux_layers::{DenseStack, OutputActivation};
use crate::candle_aux_linear::{glorot_linear, WeightInit};
use crate::candle_model_traits::DecoderModuleT;

use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};

/// latent code(s) -> hidden blocks in reverse width order -> output head
pub struct DenseDecoder {
    n_features: usize,
    n_latent: usize,
    fc: DenseStack,
    out: Linear,
    activation: OutputActivation,
}

impl DenseDecoder {
    /// Will create these variables:
    /// * `fc.{j}.*` for each width of `hidden_widths` reversed
    /// * `out.weight`, `out.bias`
    ///
    /// * `n_latent` - total width of the concatenated codes
    /// * `hidden_widths` - encoder widths; the decoder walks them backwards
    pub fn new(
        n_features: usize,
        n_latent: usize,
        hidden_widths: &[usize],
        dropout_rate: f32,
        init: WeightInit,
        activation: OutputActivation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let widths = hidden_widths.iter().rev().copied().collect::<Vec<_>>();
        let fc = DenseStack::new(n_latent, &widths, dropout_rate, init, vb.clone())?;
        let out = glorot_linear(fc.dim_out(), n_features, init, vb.pp("out"))?;
        Ok(Self {
            n_features,
            n_latent,
            fc,
            out,
            activation,
        })
    }
}

impl DecoderModuleT for DenseDecoder {
    fn forward_t(&self, codes: &[&Tensor], train: bool) -> Result<Tensor> {
        let z_nk = match codes {
            [] => candle_core::bail!("decoder needs at least one latent code"),
            [z] => (*z).clone(),
            _ => Tensor::cat(codes, 1)?,
        };
        let h_nl = self.fc.forward_t(&z_nk, train)?;
        self.activation.forward(&self.out.forward(&h_nl)?)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn kernels(&self) -> Vec<&Tensor> {
        let mut ret = self.fc.kernels();
        ret.push(self.out.weight());
        ret
    }
}
