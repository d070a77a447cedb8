use candle_core::{Result, Tensor};
use candle_nn::{Init, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

/// Kernel initialization scheme of dense layers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightInit {
    /// `U(-a, a)` with `a = sqrt(6 / (fan_in + fan_out))`
    GlorotUniform,
    /// `N(0, s^2)` with `s = sqrt(2 / (fan_in + fan_out))`, not truncated
    /// (Keras draws from a normal truncated at two standard deviations,
    /// rescaled to the same variance)
    GlorotNormal,
}

impl WeightInit {
    pub fn init(&self, fan_in: usize, fan_out: usize) -> Init {
        let fan = (fan_in + fan_out) as f64;
        match self {
            WeightInit::GlorotUniform => {
                let a = (6.0 / fan).sqrt();
                Init::Uniform { lo: -a, up: a }
            }
            WeightInit::GlorotNormal => Init::Randn {
                mean: 0.,
                stdev: (2.0 / fan).sqrt(),
            },
        }
    }
}

/// A dense `in_dim -> out_dim` affine map with these variables:
/// * `weight` (out_dim x in_dim) drawn by `init`
/// * `bias` (out_dim) starting at zero
pub fn glorot_linear(
    in_dim: usize,
    out_dim: usize,
    init: WeightInit,
    vb: VarBuilder,
) -> Result<Linear> {
    let ws = vb.get_with_hints((out_dim, in_dim), "weight", init.init(in_dim, out_dim))?;
    let bs = vb.get_with_hints(out_dim, "bias", candle_nn::init::ZERO)?;
    Ok(Linear::new(ws, Some(bs)))
}

/// Elastic-net penalty on kernels
///
/// l1 * Σ|W| + l2 * Σ W^2
///
/// Returns `None` when both coefficients are zero or there is nothing
/// to penalize.
pub fn kernel_penalty(kernels: &[&Tensor], l1: f64, l2: f64) -> Result<Option<Tensor>> {
    if (l1 == 0. && l2 == 0.) || kernels.is_empty() {
        return Ok(None);
    }

    let mut penalty: Option<Tensor> = None;
    for w in kernels {
        let mut term = w.abs()?.sum_all()?.affine(l1, 0.)?;
        if l2 != 0. {
            term = (term + w.sqr()?.sum_all()?.affine(l2, 0.)?)?;
        }
        penalty = Some(match penalty {
            None => term,
            Some(acc) => (acc + term)?,
        });
    }
    Ok(penalty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glorot_scales_follow_fan_sum() {
        match WeightInit::GlorotUniform.init(2, 4) {
            Init::Uniform { lo, up } => {
                approx::assert_abs_diff_eq!(up, 1.0, epsilon = 1e-12);
                approx::assert_abs_diff_eq!(lo, -1.0, epsilon = 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }
        // untruncated, no 0.8796 correction
        match WeightInit::GlorotNormal.init(3, 5) {
            Init::Randn { mean, stdev } => {
                approx::assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
                approx::assert_abs_diff_eq!(stdev, 0.5, epsilon = 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
