use crate::candle_aux_layers::DenseStack;
use crate::candle_aux_linear::{glorot_linear, WeightInit};
use crate::candle_gaussian_sampler::sample_or_mean;
use crate::candle_model_traits::{EncoderModuleT, GaussianLatent};

use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};

pub struct GaussianEncoder {
    n_features: usize,
    n_latent: usize,
    fc: DenseStack,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl GaussianEncoder {
    /// Will create these variables:
    /// * `fc.{j}.*` for each hidden width `j`
    /// * `z.mean.weight`, `z.mean.bias`
    /// * `z.lnvar.weight`, `z.lnvar.bias`
    ///
    /// # Arguments
    /// * `n_features` - dimension of the input vector
    /// * `n_latent` - dimension of the latent Gaussian
    /// * `hidden_widths` - widths of the hidden blocks
    /// * `dropout_rate` - dropout after each hidden block
    /// * `init` - kernel initialization
    /// * `vb` - variable builder
    pub fn new(
        n_features: usize,
        n_latent: usize,
        hidden_widths: &[usize],
        dropout_rate: f32,
        init: WeightInit,
        vb: VarBuilder,
    ) -> Result<Self> {
        let fc = DenseStack::new(n_features, hidden_widths, dropout_rate, init, vb.clone())?;
        let d_hidden = fc.dim_out();
        let z_mean = glorot_linear(d_hidden, n_latent, init, vb.pp("z.mean"))?;
        let z_lnvar = glorot_linear(d_hidden, n_latent, init, vb.pp("z.lnvar"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            z_mean,
            z_lnvar,
        })
    }

    /// mean and log variance without sampling
    pub fn latent_gaussian_params(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let h_nl = self.fc.forward_t(x_nd, train)?;
        let z_mean = self.z_mean.forward(&h_nl)?;
        let z_lnvar = self.z_lnvar.forward(&h_nl)?;
        Ok((z_mean, z_lnvar))
    }
}

impl EncoderModuleT for GaussianEncoder {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<GaussianLatent> {
        let (mean, lnvar) = self.latent_gaussian_params(x_nd, train)?;
        let code = sample_or_mean(&mean, &lnvar, train)?;
        Ok(GaussianLatent { mean, lnvar, code })
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    fn kernels(&self) -> Vec<&Tensor> {
        let mut ret = self.fc.kernels();
        ret.push(self.z_mean.weight());
        ret.push(self.z_lnvar.weight());
        ret
    }
}
