use crate::candle_aux_layers::OutputActivation;
use crate::candle_aux_linear::kernel_penalty;
use crate::candle_decoder_dense::DenseDecoder;
use crate::candle_encoder_gaussian::GaussianEncoder;
use crate::candle_loss_composer::LossComposer;
use crate::candle_model_traits::*;
use crate::candle_vcca_config::VccaConfig;
use crate::candle_vcca_error::VccaError;
use crate::candle_vcca_inference::PairedVae;

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

/// Variational CCA with private latents per modality
pub type Pvcca = PairedVae<PvccaNetwork>;

/// Three encoders and two decoders:
///
/// ```text
/// x -> enc.hx -> hx ┐
///                   ├-> dec.x -> x_hat
/// x -> enc.z  -> z ─┤
///                   ├-> dec.y -> y_hat
/// y -> enc.hy -> hy ┘
/// ```
///
/// Each decoder reads `[private, shared]`. Reconstructions are
/// non-negative (softplus).
pub struct PvccaNetwork {
    enc_z: GaussianEncoder,
    enc_hx: GaussianEncoder,
    enc_hy: GaussianEncoder,
    dec_x: DenseDecoder,
    dec_y: DenseDecoder,
    composer: LossComposer,
    kernel_l1: f64,
    kernel_l2: f64,
}

impl PvccaNetwork {
    pub fn kernels(&self) -> Vec<&Tensor> {
        let mut ret = self.enc_z.kernels();
        ret.extend(self.enc_hx.kernels());
        ret.extend(self.enc_hy.kernels());
        ret.extend(self.dec_x.kernels());
        ret.extend(self.dec_y.kernels());
        ret
    }
}

impl PairedNetworkT for PvccaNetwork {
    const NAME: &'static str = "PVCCA";

    const PRIVATE_LATENT: bool = true;

    /// Will create these variables:
    /// * `enc.z.*` shared encoder of X
    /// * `enc.hx.*`, `enc.hy.*` private encoders
    /// * `dec.x.*`, `dec.y.*` decoders with softplus output
    fn new(config: &VccaConfig, vb: VarBuilder) -> Result<Self> {
        let encoder = |n_features: usize, n_latent: usize, name: &str| {
            GaussianEncoder::new(
                n_features,
                n_latent,
                &config.hidden_widths,
                config.dropout_rate_small,
                config.weight_init,
                vb.pp(name),
            )
        };

        let n_code = config.private_latent_size + config.latent_size;
        let decoder = |n_features: usize, name: &str| {
            DenseDecoder::new(
                n_features,
                n_code,
                &config.hidden_widths,
                config.dropout_rate_big,
                config.weight_init,
                OutputActivation::Softplus,
                vb.pp(name),
            )
        };

        Ok(Self {
            enc_z: encoder(config.input_size_x, config.latent_size, "enc.z")?,
            enc_hx: encoder(config.input_size_x, config.private_latent_size, "enc.hx")?,
            enc_hy: encoder(config.input_size_y, config.private_latent_size, "enc.hy")?,
            dec_x: decoder(config.input_size_x, "dec.x")?,
            dec_y: decoder(config.input_size_y, "dec.y")?,
            composer: LossComposer::private_shared(config.recon_weight_x, config.recon_weight_y),
            kernel_l1: config.kernel_l1,
            kernel_l2: config.kernel_l2,
        })
    }

    fn objective(&self, x_nd: &Tensor, y_nd: &Tensor, train: bool) -> Result<Tensor> {
        let z = self.enc_z.forward_t(x_nd, train)?;
        let hx = self.enc_hx.forward_t(x_nd, train)?;
        let hy = self.enc_hy.forward_t(y_nd, train)?;

        let x_hat = self.dec_x.forward_t(&[&hx.code, &z.code], train)?;
        let y_hat = self.dec_y.forward_t(&[&hy.code, &z.code], train)?;

        let penalty = kernel_penalty(&self.kernels(), self.kernel_l1, self.kernel_l2)?;
        self.composer.compose(
            (x_nd, &x_hat),
            (y_nd, &y_hat),
            &[&z, &hx, &hy],
            penalty.as_ref(),
        )
    }

    fn encode_shared(&self, x_nd: &Tensor) -> Result<Tensor> {
        Ok(self.enc_z.forward_t(x_nd, false)?.mean)
    }

    fn encode_means(
        &self,
        x_nd: &Tensor,
        y_nd: Option<&Tensor>,
    ) -> std::result::Result<ComposedLatent, VccaError> {
        let y_nd = y_nd.ok_or(VccaError::MissingModality("y"))?;
        Ok(ComposedLatent {
            shared: self.encode_shared(x_nd)?,
            private_x: Some(self.enc_hx.forward_t(x_nd, false)?.mean),
            private_y: Some(self.enc_hy.forward_t(y_nd, false)?.mean),
        })
    }

    fn decode_means(&self, latent: &ComposedLatent) -> Result<(Tensor, Tensor)> {
        let (hx, hy) = match (latent.private_x.as_ref(), latent.private_y.as_ref()) {
            (Some(hx), Some(hy)) => (hx, hy),
            _ => candle_core::bail!("private latent means are required to decode"),
        };
        let x_hat = self.dec_x.forward_t(&[hx, &latent.shared], false)?;
        let y_hat = self.dec_y.forward_t(&[hy, &latent.shared], false)?;
        Ok((x_hat, y_hat))
    }
}
