use candle_core::{Result, Tensor};

/// KL divergence loss between N(mu, sigma^2) and N(0, 1)
///
/// -0.5 * Σ_k (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
/// Returns one value per sample (summed over the last axis)
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Mean squared error per sample
///
/// mse(i) = (1/D) Σ_d [ x(i,d) - xhat(i,d) ]^2
///
pub fn mse_per_sample(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    x_nd.sub(hat_nd)?.sqr()?.mean(x_nd.rank() - 1)
}

/// Sum of squared errors per sample
///
/// sse(i) = Σ_d [ x(i,d) - xhat(i,d) ]^2
///
pub fn sse_per_sample(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    x_nd.sub(hat_nd)?.sqr()?.sum(x_nd.rank() - 1)
}

/// Variance of the residual `x - xhat` pooled over every entry of the
/// batch (population variance, a scalar tensor)
pub fn residual_variance(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    let noise = x_nd.sub(hat_nd)?;
    let mu = noise.mean_all()?;
    noise.broadcast_sub(&mu)?.sqr()?.mean_all()
}

/// Gaussian negative log-likelihood with the noise variance estimated
/// from the batch residual
///
/// loss(i) = D/(2 var) * mse(i) + D/(2 var) * log(var)
///
/// where `var` is the residual variance of the batch and `D` the number
/// of features. The variance is not floored: a residual that collapses
/// to zero drives the loss to NaN or infinity.
pub fn variance_normalized_loss(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    let dd = x_nd.dim(x_nd.rank() - 1)? as f64;
    let var = residual_variance(x_nd, hat_nd)?;
    let scale = (var.recip()? * (0.5 * dd))?;
    let offset = scale.mul(&var.log()?)?;
    mse_per_sample(x_nd, hat_nd)?
        .broadcast_mul(&scale)?
        .broadcast_add(&offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn kl_is_zero_at_standard_normal() -> Result<()> {
        let dev = Device::Cpu;
        let zeros = Tensor::zeros((4, 3), candle_core::DType::F32, &dev)?;
        let kl = gaussian_kl_loss(&zeros, &zeros)?;
        assert_eq!(kl.dims(), &[4]);
        for v in kl.to_vec1::<f32>()? {
            approx::assert_abs_diff_eq!(v, 0.0, epsilon = 1e-7);
        }
        Ok(())
    }

    #[test]
    fn kl_is_positive_elsewhere() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Tensor::randn(0f32, 2., (50, 5), &dev)?;
        let lnvar = Tensor::randn(0f32, 2., (50, 5), &dev)?;
        let kl = gaussian_kl_loss(&mu, &lnvar)?.to_vec1::<f32>()?;
        assert!(kl.iter().all(|&v| v > 0.));

        // only the mean moves away from zero
        let mu = Tensor::new(&[[1.0f32, 0.0]], &dev)?;
        let lnvar = Tensor::new(&[[0.0f32, 0.0]], &dev)?;
        let kl = gaussian_kl_loss(&mu, &lnvar)?.to_vec1::<f32>()?;
        approx::assert_abs_diff_eq!(kl[0], 0.5, epsilon = 1e-6);

        // only the variance moves away from one
        let mu = Tensor::new(&[[0.0f32]], &dev)?;
        let lnvar = Tensor::new(&[[1.0f32]], &dev)?;
        let kl = gaussian_kl_loss(&mu, &lnvar)?.to_vec1::<f32>()?;
        approx::assert_abs_diff_eq!(kl[0], 0.5 * (1f32.exp() - 2.), epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn variance_normalized_loss_by_hand() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1f32, 2.], [3., 4.]], &dev)?;
        let hat = Tensor::new(&[[0f32, 2.], [3., 2.]], &dev)?;

        // residuals: [1, 0, 0, 2] -> mean 0.75, var 0.6875
        let var = residual_variance(&x, &hat)?.to_scalar::<f32>()?;
        approx::assert_abs_diff_eq!(var, 0.6875, epsilon = 1e-6);

        let mse = mse_per_sample(&x, &hat)?.to_vec1::<f32>()?;
        assert_eq!(mse, vec![0.5, 2.0]);

        let loss = variance_normalized_loss(&x, &hat)?.to_vec1::<f32>()?;
        let scale = 0.5 * 2. / var;
        for (l, m) in loss.iter().zip(mse.iter()) {
            approx::assert_abs_diff_eq!(*l, m * scale + scale * var.ln(), epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn sse_sums_over_features() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[1f32, 2., 3.]], &dev)?;
        let hat = Tensor::new(&[[0f32, 0., 0.]], &dev)?;
        assert_eq!(sse_per_sample(&x, &hat)?.to_vec1::<f32>()?, vec![14.0]);
        Ok(())
    }
}
