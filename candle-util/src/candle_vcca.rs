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

/// Shared-only variational CCA
pub type Vcca = PairedVae<VccaNetwork>;

/// One encoder over X; both decoders read its shared code
///
/// Y is never encoded: one draw of the X code feeds both decoders.
pub struct VccaNetwork {
    enc_z: GaussianEncoder,
    dec_x: DenseDecoder,
    dec_y: DenseDecoder,
    composer: LossComposer,
    kernel_l1: f64,
    kernel_l2: f64,
}

impl VccaNetwork {
    pub fn kernels(&self) -> Vec<&Tensor> {
        let mut ret = self.enc_z.kernels();
        ret.extend(self.dec_x.kernels());
        ret.extend(self.dec_y.kernels());
        ret
    }

    pub fn encoder(&self) -> &GaussianEncoder {
        &self.enc_z
    }
}

impl PairedNetworkT for VccaNetwork {
    const NAME: &'static str = "VCCA";

    const PRIVATE_LATENT: bool = false;

    /// Will create these variables:
    /// * `enc.z.*` encoder of X
    /// * `dec.x.*`, `dec.y.*` decoders with identity output
    fn new(config: &VccaConfig, vb: VarBuilder) -> Result<Self> {
        let enc_z = GaussianEncoder::new(
            config.input_size_x,
            config.latent_size,
            &config.hidden_widths,
            config.dropout_rate_small,
            config.weight_init,
            vb.pp("enc.z"),
        )?;

        let decoder = |n_features: usize, name: &str| {
            DenseDecoder::new(
                n_features,
                config.latent_size,
                &config.hidden_widths,
                config.dropout_rate_big,
                config.weight_init,
                OutputActivation::Linear,
                vb.pp(name),
            )
        };

        Ok(Self {
            enc_z,
            dec_x: decoder(config.input_size_x, "dec.x")?,
            dec_y: decoder(config.input_size_y, "dec.y")?,
            composer: LossComposer::shared_only(),
            kernel_l1: config.kernel_l1,
            kernel_l2: config.kernel_l2,
        })
    }

    fn objective(&self, x_nd: &Tensor, y_nd: &Tensor, train: bool) -> Result<Tensor> {
        let z = self.enc_z.forward_t(x_nd, train)?;
        let x_hat = self.dec_x.forward_t(&[&z.code], train)?;
        let y_hat = self.dec_y.forward_t(&[&z.code], train)?;
        let penalty = kernel_penalty(&self.kernels(), self.kernel_l1, self.kernel_l2)?;
        self.composer
            .compose((x_nd, &x_hat), (y_nd, &y_hat), &[&z], penalty.as_ref())
    }

    fn encode_shared(&self, x_nd: &Tensor) -> Result<Tensor> {
        Ok(self.enc_z.forward_t(x_nd, false)?.mean)
    }

    fn encode_means(
        &self,
        x_nd: &Tensor,
        _y_nd: Option<&Tensor>,
    ) -> std::result::Result<ComposedLatent, VccaError> {
        Ok(ComposedLatent {
            shared: self.encode_shared(x_nd)?,
            private_x: None,
            private_y: None,
        })
    }

    fn decode_means(&self, latent: &ComposedLatent) -> Result<(Tensor, Tensor)> {
        let x_hat = self.dec_x.forward_t(&[&latent.shared], false)?;
        let y_hat = self.dec_y.forward_t(&[&latent.shared], false)?;
        Ok((x_hat, y_hat))
    }
}
