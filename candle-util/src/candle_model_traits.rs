use crate::candle_loss_functions::gaussian_kl_loss;
use crate::candle_vcca_config::VccaConfig;
use crate::candle_vcca_error::VccaError;

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

/// Parameters and a draw of a diagonal Gaussian latent
pub struct GaussianLatent {
    /// mean (n x k)
    pub mean: Tensor,
    /// log variance (n x k)
    pub lnvar: Tensor,
    /// sampled code in training mode, `mean` otherwise (n x k)
    pub code: Tensor,
}

impl GaussianLatent {
    /// KL divergence to N(0, I) for each sample (n)
    pub fn kl_loss(&self) -> Result<Tensor> {
        gaussian_kl_loss(&self.mean, &self.lnvar)
    }
}

pub trait EncoderModuleT {
    /// An encoder that maps one modality to a latent Gaussian
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `train` - sample the code and use dropout/batch statistics;
    ///   otherwise the code is the mean
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<GaussianLatent>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;

    /// dense kernels subject to regularization
    fn kernels(&self) -> Vec<&Tensor>;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction
    ///
    /// * `codes` - latent codes, concatenated along the feature axis in
    ///   the given order (private first, then shared)
    fn forward_t(&self, codes: &[&Tensor], train: bool) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;

    fn kernels(&self) -> Vec<&Tensor>;
}

/// Latent means of a paired model
pub struct ComposedLatent {
    /// shared latent means (n x latent_size)
    pub shared: Tensor,
    /// private latent means of X (n x private_latent_size)
    pub private_x: Option<Tensor>,
    /// private latent means of Y (n x private_latent_size)
    pub private_y: Option<Tensor>,
}

/// The encoders, decoders and loss of one paired VAE variant
pub trait PairedNetworkT: Sized {
    /// display name used in logs
    const NAME: &'static str;

    /// whether the network has private latents, so that inference
    /// needs both modalities
    const PRIVATE_LATENT: bool;

    /// Create all the variables of the network under `vb`
    fn new(config: &VccaConfig, vb: VarBuilder) -> Result<Self>;

    /// Scalar objective of a paired minibatch, including the kernel
    /// penalty
    fn objective(&self, x_nd: &Tensor, y_nd: &Tensor, train: bool) -> Result<Tensor>;

    /// Shared latent means of `x_nd` in inference mode
    fn encode_shared(&self, x_nd: &Tensor) -> Result<Tensor>;

    /// All latent means in inference mode
    fn encode_means(
        &self,
        x_nd: &Tensor,
        y_nd: Option<&Tensor>,
    ) -> std::result::Result<ComposedLatent, VccaError>;

    /// Reconstruct both modalities from latent means
    fn decode_means(&self, latent: &ComposedLatent) -> Result<(Tensor, Tensor)>;
}
