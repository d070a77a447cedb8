use candle_util::candle_core::{Device, Tensor};
use clap::Args;
use log::info;
use matrix_util::mtx_io::write_mtx_triplets;
use matrix_util::traits::IoOps;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Poisson};

#[derive(Args, Debug, Clone)]
pub struct SimArgs {
    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for simulated files:\n\
		     - {out}.x.tsv.gz (dense Gaussian, samples x features)\n\
		     - {out}.y.mtx.gz (Poisson counts, samples x features)\n\
		     - {out}.shared.tsv.gz (true shared factors)"
    )]
    pub out: Box<str>,

    #[arg(long, default_value_t = 500, help = "Number of samples")]
    pub samples: usize,

    #[arg(long, default_value_t = 100, help = "Number of features in X")]
    pub features_x: usize,

    #[arg(long, default_value_t = 50, help = "Number of features in Y")]
    pub features_y: usize,

    #[arg(long, default_value_t = 4, help = "Number of shared factors")]
    pub shared: usize,

    #[arg(
        long,
        default_value_t = 2,
        help = "Number of private factors in each modality"
    )]
    pub private: usize,

    #[arg(
        long,
        default_value_t = 0.1,
        help = "Noise standard deviation of X"
    )]
    pub noise: f32,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    pub seed: u64,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

pub struct SimOut {
    /// samples x features_x
    pub x: Tensor,
    /// samples x features_y
    pub y: Tensor,
    /// non-zero counts of `y` as `(sample, feature, count)`
    pub y_triplets: Vec<(usize, usize, f32)>,
    /// samples x shared
    pub shared: Tensor,
}

/// Draw paired data with shared and private factors
///
/// ```text
/// X(i,:) = [hx(i,:), z(i,:)] * Wx + noise * e(i,:)
/// Y(i,j) ~ Poisson( exp( [hy(i,:), z(i,:)] * Wy(:,j) ) )
/// ```
///
/// with `z`, `hx`, `hy`, `e` standard normal and the columns of `Wx`,
/// `Wy` drawn from `N(0, 1/k)` for `k` factors.
pub fn generate_paired_data(args: &SimArgs) -> anyhow::Result<SimOut> {
    let nn = args.samples;
    let kk = args.shared + args.private;
    if nn == 0 || kk == 0 || args.features_x == 0 || args.features_y == 0 {
        anyhow::bail!("samples, features and factors must be positive");
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(args.seed);
    let std_normal = Normal::new(0f32, 1f32)?;
    let mut rnorm = |rows: usize, cols: usize, sd: f32| -> anyhow::Result<Tensor> {
        let data = (0..rows * cols)
            .map(|_| std_normal.sample(&mut rng) * sd)
            .collect::<Vec<_>>();
        Ok(Tensor::from_vec(data, (rows, cols), &Device::Cpu)?)
    };

    let dev_sd = 1. / (kk as f32).sqrt();
    let z = rnorm(nn, args.shared, 1.)?;
    let hx = rnorm(nn, args.private, 1.)?;
    let hy = rnorm(nn, args.private, 1.)?;
    let wx = rnorm(kk, args.features_x, dev_sd)?;
    let wy = rnorm(kk, args.features_y, dev_sd)?;
    let noise = rnorm(nn, args.features_x, args.noise)?;

    let x = (Tensor::cat(&[&hx, &z], 1)?.matmul(&wx)? + noise)?;
    let rate = Tensor::cat(&[&hy, &z], 1)?.matmul(&wy)?.exp()?.to_vec2::<f32>()?;

    let mut y_triplets = vec![];
    let mut y_dense = vec![0f32; nn * args.features_y];
    for (i, row) in rate.iter().enumerate() {
        for (j, &lambda) in row.iter().enumerate() {
            let count: f32 = Poisson::new(lambda.max(1e-8))?.sample(&mut rng);
            if count > 0. {
                y_triplets.push((i, j, count));
                y_dense[i * args.features_y + j] = count;
            }
        }
    }
    let y = Tensor::from_vec(y_dense, (nn, args.features_y), &Device::Cpu)?;

    Ok(SimOut {
        x,
        y,
        y_triplets,
        shared: z,
    })
}

/// Generate paired data and write `{out}.x.tsv.gz`, `{out}.y.mtx.gz`
/// and `{out}.shared.tsv.gz`
pub fn run_simulate(args: &SimArgs) -> anyhow::Result<()> {
    let sim = generate_paired_data(args)?;

    let x_file = format!("{}.x.tsv.gz", args.out);
    let y_file = format!("{}.y.mtx.gz", args.out);
    let z_file = format!("{}.shared.tsv.gz", args.out);

    sim.x.to_tsv(&x_file)?;
    write_mtx_triplets(&sim.y_triplets, args.samples, args.features_y, &y_file)?;
    sim.shared.to_tsv(&z_file)?;

    info!(
        "sampled {} x {} Gaussian and {} x {} Poisson ({} non-zero) data",
        args.samples,
        args.features_x,
        args.samples,
        args.features_y,
        sim.y_triplets.len()
    );
    info!("wrote {}, {}, {}", x_file, y_file, z_file);
    Ok(())
}
