use crate::candle_loss_functions::*;
use crate::candle_model_traits::GaussianLatent;

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// How a modality's reconstruction error enters the objective
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReconstructionPolicy {
    /// Gaussian NLL with the noise variance of the residual estimated
    /// from each batch: `0.5 * D/var * (mse + log var)`
    NoiseVarianceNormalized,
    /// A fixed multiplier on the squared error summed over features
    FixedWeight(f64),
}

impl ReconstructionPolicy {
    /// per-sample reconstruction loss (n)
    pub fn loss(&self, x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
        match self {
            ReconstructionPolicy::NoiseVarianceNormalized => {
                variance_normalized_loss(x_nd, hat_nd)
            }
            ReconstructionPolicy::FixedWeight(w) => sse_per_sample(x_nd, hat_nd)? * *w,
        }
    }
}

/// Combines reconstruction and KL terms into one scalar objective
///
/// mean_i [ Σ_m recon_m(i) + Σ_k w_k * KL_k(i) ] + penalty
///
#[derive(Clone, Debug)]
pub struct LossComposer {
    recon_x: ReconstructionPolicy,
    recon_y: ReconstructionPolicy,
    kl_weights: Vec<f64>,
}

/// Per-sample terms of one batch, kept for reporting
pub struct LossTerms {
    pub recon_x: Tensor,
    pub recon_y: Tensor,
    pub kl: Tensor,
    pub total: Tensor,
}

impl LossComposer {
    /// one shared latent; its KL term counts twice
    pub fn shared_only() -> Self {
        Self {
            recon_x: ReconstructionPolicy::NoiseVarianceNormalized,
            recon_y: ReconstructionPolicy::NoiseVarianceNormalized,
            kl_weights: vec![2.],
        }
    }

    /// shared, private-x and private-y latents, each KL weighted once
    pub fn private_shared(weight_x: f64, weight_y: f64) -> Self {
        Self {
            recon_x: ReconstructionPolicy::FixedWeight(weight_x),
            recon_y: ReconstructionPolicy::FixedWeight(weight_y),
            kl_weights: vec![1., 1., 1.],
        }
    }

    pub fn num_latents(&self) -> usize {
        self.kl_weights.len()
    }

    pub fn policies(&self) -> (ReconstructionPolicy, ReconstructionPolicy) {
        (self.recon_x, self.recon_y)
    }

    /// Per-sample loss terms of a batch
    ///
    /// * `x` - (observed x, reconstructed x)
    /// * `y` - (observed y, reconstructed y)
    /// * `latents` - latent Gaussians in the order of the KL weights
    pub fn terms(
        &self,
        x: (&Tensor, &Tensor),
        y: (&Tensor, &Tensor),
        latents: &[&GaussianLatent],
    ) -> Result<LossTerms> {
        if latents.len() != self.kl_weights.len() {
            candle_core::bail!(
                "expected {} latent Gaussians, got {}",
                self.kl_weights.len(),
                latents.len()
            );
        }

        let recon_x = self.recon_x.loss(x.0, x.1)?;
        let recon_y = self.recon_y.loss(y.0, y.1)?;

        let mut kl: Option<Tensor> = None;
        for (latent, &w) in latents.iter().zip(self.kl_weights.iter()) {
            let kl_k = (latent.kl_loss()? * w)?;
            kl = Some(match kl {
                None => kl_k,
                Some(acc) => (acc + kl_k)?,
            });
        }
        let kl = match kl {
            Some(kl) => kl,
            None => recon_x.zeros_like()?,
        };

        let total = ((&recon_x + &recon_y)? + &kl)?;
        Ok(LossTerms {
            recon_x,
            recon_y,
            kl,
            total,
        })
    }

    /// Scalar objective averaged over the batch, plus an optional
    /// kernel penalty
    pub fn compose(
        &self,
        x: (&Tensor, &Tensor),
        y: (&Tensor, &Tensor),
        latents: &[&GaussianLatent],
        penalty: Option<&Tensor>,
    ) -> Result<Tensor> {
        let loss = self.terms(x, y, latents)?.total.mean_all()?;
        match penalty {
            Some(p) => loss + p,
            None => Ok(loss),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn standard_latent(n: usize, k: usize, dev: &Device) -> Result<GaussianLatent> {
        let mean = Tensor::zeros((n, k), DType::F32, dev)?;
        Ok(GaussianLatent {
            lnvar: mean.clone(),
            code: mean.clone(),
            mean,
        })
    }

    #[test]
    fn shared_kl_counts_twice() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::randn(0f32, 1., (6, 4), &dev)?;
        let y = Tensor::randn(0f32, 1., (6, 3), &dev)?;
        let x_hat = Tensor::randn(0f32, 1., (6, 4), &dev)?;
        let y_hat = Tensor::randn(0f32, 1., (6, 3), &dev)?;

        let mut z = standard_latent(6, 2, &dev)?;
        let base = LossComposer::shared_only()
            .compose((&x, &x_hat), (&y, &y_hat), &[&z], None)?
            .to_scalar::<f32>()?;

        // KL of N(1, 1) against N(0, 1) is 0.5 per latent dimension
        z.mean = Tensor::ones((6, 2), DType::F32, &dev)?;
        let shifted = LossComposer::shared_only()
            .compose((&x, &x_hat), (&y, &y_hat), &[&z], None)?
            .to_scalar::<f32>()?;

        approx::assert_abs_diff_eq!(shifted - base, 2. * 2. * 0.5, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn fixed_weights_scale_feature_sums() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1f32, 1.], [0., 0.]], &dev)?;
        let y = Tensor::new(&[[2f32], [0.]], &dev)?;
        let zeros_x = x.zeros_like()?;
        let zeros_y = y.zeros_like()?;

        let z = standard_latent(2, 3, &dev)?;
        let composer = LossComposer::private_shared(10., 2000.);
        let terms = composer.terms((&x, &zeros_x), (&y, &zeros_y), &[&z, &z, &z])?;

        assert_eq!(terms.recon_x.to_vec1::<f32>()?, vec![20., 0.]);
        assert_eq!(terms.recon_y.to_vec1::<f32>()?, vec![8000., 0.]);
        assert_eq!(terms.kl.to_vec1::<f32>()?, vec![0., 0.]);

        let penalty = Tensor::new(1.5f32, &dev)?;
        let loss = composer
            .compose((&x, &zeros_x), (&y, &zeros_y), &[&z, &z, &z], Some(&penalty))?
            .to_scalar::<f32>()?;
        approx::assert_abs_diff_eq!(loss, (20. + 8000.) / 2. + 1.5, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn wrong_number_of_latents_fails() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::ones((2, 2), DType::F32, &dev)?;
        let z = standard_latent(2, 1, &dev)?;
        let composer = LossComposer::private_shared(1., 1.);
        assert!(composer.terms((&x, &x), (&x, &x), &[&z]).is_err());
        Ok(())
    }
}
