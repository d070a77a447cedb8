use crate::mungbean_input::read_input_matrix;

use candle_util::candle_core::{Device, Tensor};
use candle_util::candle_data_loader::RowsToTensorVec;
use candle_util::candle_model_traits::PairedNetworkT;
use candle_util::candle_pvcca::PvccaNetwork;
use candle_util::candle_train_history::TrainHistory;
use candle_util::candle_vcca::VccaNetwork;
use candle_util::candle_vcca_config::VccaConfig;
use candle_util::candle_vcca_error::VccaError;
use candle_util::candle_vcca_inference::PairedVae;
use clap::{Args, ValueEnum};
use log::info;
use matrix_util::traits::IoOps;
use std::path::PathBuf;

/// Batch size of the convenience entry point
pub const DEFAULT_BATCH_SIZE: usize = 128;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum IntegrationMode {
    /// shared latent only
    Vcca,
    /// shared latent plus a private latent per modality
    Pvcca,
}

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn device(&self, device_no: usize) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Metal => Device::new_metal(device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(device_no)?,
            ComputeDevice::Cpu => Device::Cpu,
        })
    }
}

/// Settings of [`fit_integration`]
#[derive(Clone, Debug)]
pub struct FitIntegrationArgs {
    pub mode: IntegrationMode,
    /// hidden widths followed by the shared latent size,
    /// e.g. `[128, 64, 32, 5]`
    pub hidden_layers: Vec<usize>,
    /// private latent size of each modality (PVCCA)
    pub latent_xy_size: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f32,
    pub patience: usize,
    pub learning_rate: f64,
    /// directory for checkpoint, logs and config
    pub path: PathBuf,
    pub device: Device,
    pub show_progress: bool,
    pub verbose: bool,
}

impl Default for FitIntegrationArgs {
    fn default() -> Self {
        Self {
            mode: IntegrationMode::Pvcca,
            hidden_layers: vec![128, 64, 32, 5],
            latent_xy_size: 2,
            epochs: 30,
            batch_size: DEFAULT_BATCH_SIZE,
            validation_split: 0.,
            patience: 60,
            learning_rate: 1e-3,
            path: PathBuf::from("."),
            device: Device::Cpu,
            show_progress: true,
            verbose: false,
        }
    }
}

/// Everything a fitted model can report about its training data
pub struct IntegrationOut {
    pub latent: Tensor,
    pub private_x: Option<Tensor>,
    pub private_y: Option<Tensor>,
    pub recon: Option<(Tensor, Tensor)>,
    pub history: TrainHistory,
}

fn model_config(
    args: &FitIntegrationArgs,
    input_size_x: usize,
    input_size_y: usize,
) -> anyhow::Result<VccaConfig> {
    let mut config = match args.mode {
        IntegrationMode::Vcca => VccaConfig::vcca(input_size_x, input_size_y, &[], 0),
        IntegrationMode::Pvcca => {
            let mut config = VccaConfig::pvcca(input_size_x, input_size_y);
            config.private_latent_size = args.latent_xy_size;
            config
        }
    }
    .with_schedule(&args.hidden_layers)?
    .with_path(&args.path);

    config.validation_split = args.validation_split;
    config.patience = args.patience;
    config.learning_rate = args.learning_rate;
    config.show_progress = args.show_progress;
    config.verbose = args.verbose;
    Ok(config)
}

fn build_and_train<N, X, Y>(
    config: VccaConfig,
    x: &X,
    y: &Y,
    args: &FitIntegrationArgs,
    reconstruct: bool,
) -> anyhow::Result<IntegrationOut>
where
    N: PairedNetworkT,
    X: RowsToTensorVec + ?Sized,
    Y: RowsToTensorVec + ?Sized,
{
    let mut model = PairedVae::<N>::new(config, args.device.clone())?;
    model.build()?;
    model.compile()?;

    let history = model.train(x, y, args.batch_size, args.epochs)?;
    info!("trained {} epochs", history.len());

    let latent = model.integrate_compose(x, Some(y))?;
    let recon = if reconstruct {
        Some(model.get_output(x, Some(y))?)
    } else {
        None
    };

    Ok(IntegrationOut {
        latent: latent.shared,
        private_x: latent.private_x,
        private_y: latent.private_y,
        recon,
        history,
    })
}

/// Build, compile and train a model on `x` and `y`, then report the
/// latent means (and reconstructions if `reconstruct`)
pub fn run_integration<X, Y>(
    x: &X,
    y: &Y,
    args: &FitIntegrationArgs,
    reconstruct: bool,
) -> anyhow::Result<IntegrationOut>
where
    X: RowsToTensorVec + ?Sized,
    Y: RowsToTensorVec + ?Sized,
{
    if x.num_rows() != y.num_rows() {
        return Err(VccaError::ShapeMismatch {
            what: "number of samples in y",
            expected: x.num_rows(),
            actual: y.num_rows(),
        }
        .into());
    }

    let config = model_config(args, x.num_cols(), y.num_cols())?;
    match args.mode {
        IntegrationMode::Vcca => build_and_train::<VccaNetwork, _, _>(config, x, y, args, reconstruct),
        IntegrationMode::Pvcca => {
            build_and_train::<PvccaNetwork, _, _>(config, x, y, args, reconstruct)
        }
    }
}

/// Fit the selected model on paired data and return the shared latent
/// embedding of `x` (samples x shared latent size)
///
/// Sparse inputs (`CsrMatrix<f32>`) are densified row by row.
pub fn fit_integration<X, Y>(x: &X, y: &Y, args: &FitIntegrationArgs) -> anyhow::Result<Tensor>
where
    X: RowsToTensorVec + ?Sized,
    Y: RowsToTensorVec + ?Sized,
{
    Ok(run_integration(x, y, args, false)?.latent)
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(
        short = 'x',
        long = "x-file",
        required = true,
        help = "Data file of modality X",
        long_help = "Data file of modality X (samples x features).\n\
		     Delimited text (.tsv, .csv or whitespace), optionally gzipped,\n\
		     or MatrixMarket with --sparse-x."
    )]
    pub x_file: Box<str>,

    #[arg(
        short = 'y',
        long = "y-file",
        required = true,
        help = "Data file of modality Y",
        long_help = "Data file of modality Y (samples x features).\n\
		     Rows must be paired with the rows of X."
    )]
    pub y_file: Box<str>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.latent.tsv.gz\n\
		     - {out}.private_x.tsv.gz and {out}.private_y.tsv.gz (pvcca)\n\
		     - {out}.history.tsv\n\
		     - {out}.recon_x.tsv.gz and {out}.recon_y.tsv.gz (--reconstruct)\n\
		     - {out}_model/ checkpoint, logs and config"
    )]
    pub out: Box<str>,

    #[arg(
        long,
        value_enum,
        default_value = "pvcca",
        help = "Model variant",
        long_help = "Model variant.\n\
		     vcca: one shared latent encoded from X.\n\
		     pvcca: shared latent plus a private latent per modality."
    )]
    pub mode: IntegrationMode,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![128, 64, 32, 5],
        help = "Hidden layers and shared latent size",
        long_help = "Hidden layer widths (comma-separated).\n\
		     The last entry is the shared latent size.\n\
		     Example: 128,64,32,5"
    )]
    pub hidden_layers: Vec<usize>,

    #[arg(
        long,
        default_value_t = 2,
        help = "Private latent size",
        long_help = "Dimension of each private latent (pvcca only)."
    )]
    pub latent_xy_size: usize,

    #[arg(
        long,
        short = 'i',
        default_value_t = 30,
        help = "Number of training epochs"
    )]
    pub epochs: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_BATCH_SIZE,
        help = "Minibatch size"
    )]
    pub batch_size: usize,

    #[arg(long, default_value_t = false, help = "X is a MatrixMarket file")]
    pub sparse_x: bool,

    #[arg(long, default_value_t = false, help = "Y is a MatrixMarket file")]
    pub sparse_y: bool,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "Validation fraction",
        long_help = "Fraction of the last rows held out from training\n\
		     and scored after each epoch."
    )]
    pub validation_split: f32,

    #[arg(
        long,
        default_value_t = 60,
        help = "Early stopping patience",
        long_help = "Stop after this many epochs without improvement of the loss."
    )]
    pub patience: usize,

    #[arg(long, default_value_t = 1e-3, help = "Learning rate")]
    pub learning_rate: f64,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "A device for cuda or metal")]
    pub device_no: usize,

    #[arg(
        long,
        default_value_t = false,
        help = "Write reconstructions",
        long_help = "Write reconstructed X and Y decoded from the latent means."
    )]
    pub reconstruct: bool,

    #[arg(
        long,
        short,
        help = "Verbosity",
        long_help = "Enable verbose output.\n\
		     Logs the loss of every epoch instead of a progress bar."
    )]
    pub verbose: bool,
}

/// Read the data files, fit and write the outputs
pub fn run_fit(args: &FitArgs) -> anyhow::Result<()> {
    let x = read_input_matrix(&args.x_file, args.sparse_x)?;
    let y = read_input_matrix(&args.y_file, args.sparse_y)?;

    let fit_args = FitIntegrationArgs {
        mode: args.mode,
        hidden_layers: args.hidden_layers.clone(),
        latent_xy_size: args.latent_xy_size,
        epochs: args.epochs,
        batch_size: args.batch_size,
        validation_split: args.validation_split,
        patience: args.patience,
        learning_rate: args.learning_rate,
        path: PathBuf::from(format!("{}_model", args.out)),
        device: args.device.device(args.device_no)?,
        show_progress: true,
        verbose: args.verbose,
    };

    let out = run_integration(&x, &y, &fit_args, args.reconstruct)?;

    let latent_file = format!("{}.latent.tsv.gz", args.out);
    out.latent.to_tsv(&latent_file)?;
    info!("wrote {}", latent_file);

    if let Some(hx) = out.private_x.as_ref() {
        hx.to_tsv(&format!("{}.private_x.tsv.gz", args.out))?;
    }
    if let Some(hy) = out.private_y.as_ref() {
        hy.to_tsv(&format!("{}.private_y.tsv.gz", args.out))?;
    }
    if let Some((x_hat, y_hat)) = out.recon.as_ref() {
        x_hat.to_tsv(&format!("{}.recon_x.tsv.gz", args.out))?;
        y_hat.to_tsv(&format!("{}.recon_y.tsv.gz", args.out))?;
    }

    out.history.to_tsv(&format!("{}.history.tsv", args.out))?;
    info!("loss over epochs:\n{}", out.history.plot_loss(60, 12));
    Ok(())
}
