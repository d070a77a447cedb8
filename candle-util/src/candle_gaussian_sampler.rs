use candle_core::{Result, Tensor};

///
/// z = mu + sigma * eps
/// where eps ~ N(0, 1)
///
/// All randomness lives in `eps`, so gradients flow to `z_mean` and
/// `z_lnvar` only.
///
/// # Arguments
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
pub fn reparameterize(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let eps = Tensor::randn_like(z_mean, 0., 1.)?;
    let sigma = (z_lnvar * 0.5)?.exp()?;
    z_mean + (sigma * eps)?
}

/// A sample in training mode, the mean otherwise
pub fn sample_or_mean(z_mean: &Tensor, z_lnvar: &Tensor, train: bool) -> Result<Tensor> {
    if train {
        reparameterize(z_mean, z_lnvar)
    } else {
        Ok(z_mean.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    #[test]
    fn samples_keep_shape_and_vary() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Tensor::new(&[[0.5f32, -1.0, 2.0]], &dev)?;
        let lnvar = Tensor::zeros((1, 3), candle_core::DType::F32, &dev)?;

        let a = reparameterize(&mu, &lnvar)?;
        let b = reparameterize(&mu, &lnvar)?;
        assert_eq!(a.dims(), mu.dims());
        assert_ne!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn sample_average_approaches_mean() -> Result<()> {
        let dev = Device::Cpu;
        let n = 20_000;
        let mu = Tensor::new(&[[0.5f32, -1.0, 2.0]], &dev)?.broadcast_as((n, 3))?;
        let lnvar = Tensor::new(&[[0.0f32, -2.0, 1.0]], &dev)?.broadcast_as((n, 3))?;

        let avg = reparameterize(&mu.contiguous()?, &lnvar.contiguous()?)?
            .mean(0)?
            .to_vec1::<f32>()?;

        for (a, m) in avg.iter().zip([0.5f32, -1.0, 2.0]) {
            approx::assert_abs_diff_eq!(*a, m, epsilon = 0.06);
        }
        Ok(())
    }

    #[test]
    fn mean_mode_is_deterministic() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Tensor::new(&[[0.1f32, 0.2]], &dev)?;
        let lnvar = Tensor::new(&[[3.0f32, 3.0]], &dev)?;
        let z = sample_or_mean(&mu, &lnvar, false)?;
        assert_eq!(z.to_vec2::<f32>()?, mu.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn gradient_flows_through_the_sample() -> Result<()> {
        let dev = Device::Cpu;
        let mu = Var::new(&[[0.3f32, -0.7]], &dev)?;
        let lnvar = Var::new(&[[0.0f32, 0.5]], &dev)?;
        let z = reparameterize(mu.as_tensor(), lnvar.as_tensor())?;
        let grads = z.sum_all()?.backward()?;

        // d(sum z)/d(mu) = 1 for each entry
        let g_mu = grads.get(mu.as_tensor()).expect("mu grad").to_vec2::<f32>()?;
        assert_eq!(g_mu, vec![vec![1.0, 1.0]]);
        assert!(grads.get(lnvar.as_tensor()).is_some());
        Ok(())
    }
}
