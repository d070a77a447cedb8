use crate::candle_data_loader::{PairedInMemoryData, RowsToTensorVec};
use crate::candle_epoch_hooks::*;
use crate::candle_model_traits::{ComposedLatent, PairedNetworkT};
use crate::candle_train_history::TrainHistory;
use crate::candle_vcca_config::VccaConfig;
use crate::candle_vcca_error::{Result, VccaError};

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info, warn};
use std::fmt;
use std::path::Path;

/// rows per forward pass at inference
const PREDICT_BATCH: usize = 512;

/// Life cycle of a paired VAE: `Unbuilt -> Built -> Compiled -> Trained`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModelState {
    Unbuilt,
    Built,
    Compiled,
    Trained,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelState::Unbuilt => "unbuilt",
            ModelState::Built => "built",
            ModelState::Compiled => "compiled",
            ModelState::Trained => "trained",
        };
        write!(f, "{}", name)
    }
}

/// A paired VAE over row-aligned matrices X and Y
///
/// The network `N` decides the encoders, decoders and objective; this
/// type owns the variables, the optimizer, the epoch hooks and the
/// state machine around them.
pub struct PairedVae<N: PairedNetworkT> {
    config: VccaConfig,
    device: Device,
    parameters: VarMap,
    state: ModelState,
    network: Option<N>,
    optimizer: Option<AdamW>,
    hooks: Vec<Box<dyn EpochHook>>,
}

impl<N: PairedNetworkT> PairedVae<N> {
    /// Validate `config` and create an unbuilt model on `device`
    pub fn new(config: VccaConfig, device: Device) -> Result<Self> {
        config.validate(N::PRIVATE_LATENT)?;
        Ok(Self {
            config,
            device,
            parameters: VarMap::new(),
            state: ModelState::Unbuilt,
            network: None,
            optimizer: None,
            hooks: vec![],
        })
    }

    pub fn config(&self) -> &VccaConfig {
        &self.config
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn parameters(&self) -> &VarMap {
        &self.parameters
    }

    pub fn network(&self) -> Option<&N> {
        self.network.as_ref()
    }

    /// Names of the epoch hooks in the order they run
    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Add a hook after the ones already registered
    pub fn push_hook(&mut self, hook: Box<dyn EpochHook>) {
        self.hooks.push(hook);
    }

    fn require(&self, operation: &'static str, allowed: &[ModelState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(VccaError::State {
                operation,
                required: allowed[0],
                actual: self.state,
            })
        }
    }

    fn check_cols(&self, what: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(VccaError::ShapeMismatch {
                what,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn check_rows(&self, nx: usize, ny: usize) -> Result<()> {
        if nx != ny {
            return Err(VccaError::ShapeMismatch {
                what: "number of samples in y",
                expected: nx,
                actual: ny,
            });
        }
        Ok(())
    }

    fn trained_network(&self, operation: &'static str) -> Result<&N> {
        self.require(operation, &[ModelState::Trained])?;
        self.network
            .as_ref()
            .ok_or(VccaError::State {
                operation,
                required: ModelState::Built,
                actual: self.state,
            })
    }

    /// Create the encoders and decoders, compose the default epoch
    /// hooks and write `config.json` into the model directory
    pub fn build(&mut self) -> Result<()> {
        self.require("build", &[ModelState::Unbuilt])?;

        let vb = VarBuilder::from_varmap(&self.parameters, DType::F32, &self.device);
        self.network = Some(N::new(&self.config, vb)?);

        let mut hooks = default_hooks(
            &self.config.path,
            &self.config.lr_plateau,
            self.config.patience,
        );
        hooks.append(&mut self.hooks);
        self.hooks = hooks;

        let config_file = self.config.path.join("config.json");
        if let Err(err) = std::fs::create_dir_all(&self.config.path)
            .map_err(anyhow::Error::from)
            .and_then(|_| self.config.to_json(&config_file))
        {
            warn!("failed to write {}: {}", config_file.display(), err);
        }

        self.state = ModelState::Built;
        Ok(())
    }

    /// Bind Adam to every variable and log a summary of the model
    pub fn compile(&mut self) -> Result<()> {
        self.require("compile", &[ModelState::Built])?;

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            weight_decay: 0.,
        };
        self.optimizer = Some(AdamW::new(self.parameters.all_vars(), params)?);

        for line in self.summary()? {
            info!("{}", line);
        }

        self.state = ModelState::Compiled;
        Ok(())
    }

    /// Variable names, shapes and parameter counts
    pub fn summary(&self) -> Result<Vec<String>> {
        let data = self
            .parameters
            .data()
            .lock()
            .map_err(|e| anyhow::anyhow!("variable map: {}", e))?;

        let mut names = data.keys().cloned().collect::<Vec<_>>();
        names.sort();

        let mut lines = vec![format!("{} model", N::NAME)];
        let (mut ntrain, mut nfixed) = (0usize, 0usize);
        for name in names.iter() {
            if let Some(var) = data.get(name) {
                let count = var.elem_count();
                if name.ends_with("running_mean") || name.ends_with("running_var") {
                    nfixed += count;
                } else {
                    ntrain += count;
                }
                lines.push(format!("{:<40} {:?}", name, var.dims()));
            }
        }
        lines.push(format!("total params: {}", ntrain + nfixed));
        lines.push(format!("trainable params: {}", ntrain));
        lines.push(format!("non-trainable params: {}", nfixed));
        Ok(lines)
    }

    /// Train for up to `epochs` passes over shuffled minibatches
    ///
    /// * `x` - samples x features of X
    /// * `y` - samples x features of Y, row-aligned with `x`
    /// * `batch_size` - rows per minibatch
    /// * `epochs` - maximum number of passes
    ///
    /// The last `validation_split` fraction of rows never enters an
    /// optimizer step and is scored after every epoch. Hooks may change
    /// the learning rate or stop early.
    pub fn train<X, Y>(
        &mut self,
        x: &X,
        y: &Y,
        batch_size: usize,
        epochs: usize,
    ) -> Result<TrainHistory>
    where
        X: RowsToTensorVec + ?Sized,
        Y: RowsToTensorVec + ?Sized,
    {
        self.check_rows(x.num_rows(), y.num_rows())?;
        self.require("train", &[ModelState::Compiled, ModelState::Trained])?;
        self.check_cols("number of features in x", self.config.input_size_x, x.num_cols())?;
        self.check_cols("number of features in y", self.config.input_size_y, y.num_cols())?;

        if batch_size == 0 {
            return Err(VccaError::EmptyInput("batch size is zero"));
        }
        if x.num_rows() == 0 {
            return Err(VccaError::EmptyInput("no samples to train on"));
        }

        let data = PairedInMemoryData::new(x, y)?;
        let (mut train_data, val_data) = data.split_validation(self.config.validation_split);
        if train_data.num_samples() == 0 {
            return Err(VccaError::EmptyInput(
                "no training samples left after the validation split",
            ));
        }

        let mut val_data = val_data;
        if let Some(val) = val_data.as_mut() {
            val.ordered_minibatch(PREDICT_BATCH);
        }

        let network = self.network.as_ref().ok_or(VccaError::State {
            operation: "train",
            required: ModelState::Built,
            actual: self.state,
        })?;
        let adam = self.optimizer.as_mut().ok_or(VccaError::State {
            operation: "train",
            required: ModelState::Compiled,
            actual: self.state,
        })?;

        let device = &self.device;
        let verbose = self.config.verbose;

        let pb = ProgressBar::new(epochs as u64);
        if !self.config.show_progress || verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        debug!(
            "training {} on {} samples ({} held out), batch size {}",
            N::NAME,
            train_data.num_samples(),
            val_data.as_ref().map(|v| v.num_samples()).unwrap_or(0),
            batch_size
        );

        for hook in self.hooks.iter_mut() {
            hook.on_train_begin();
        }

        let mut history = TrainHistory::default();

        for epoch in 0..epochs {
            train_data.shuffle_minibatch(batch_size);

            let mut loss_tot = 0f64;
            let mut ntot = 0usize;
            for b in 0..train_data.num_minibatch() {
                let mb = train_data.minibatch(b, device)?;
                let loss = network.objective(&mb.x, &mb.y, true)?;
                adam.backward_step(&loss)?;
                let nb = mb.samples.len();
                loss_tot += loss.to_scalar::<f32>()? as f64 * nb as f64;
                ntot += nb;
            }
            let loss = (loss_tot / ntot.max(1) as f64) as f32;

            if !loss.is_finite() {
                pb.finish_and_clear();
                return Err(VccaError::NumericalInstability { epoch, loss });
            }

            let val_loss = match val_data.as_ref() {
                Some(val) => {
                    let mut tot = 0f64;
                    for b in 0..val.num_minibatch() {
                        let mb = val.minibatch(b, device)?;
                        let l = network.objective(&mb.x, &mb.y, false)?;
                        tot += l.to_scalar::<f32>()? as f64 * mb.samples.len() as f64;
                    }
                    Some((tot / val.num_samples() as f64) as f32)
                }
                None => None,
            };

            let learning_rate = adam.learning_rate();
            history.push(loss, val_loss, learning_rate);

            let state = EpochState {
                epoch,
                loss,
                val_loss,
                learning_rate,
                parameters: &self.parameters,
            };

            let mut stop = false;
            for hook in self.hooks.iter_mut() {
                match hook.on_epoch_end(&state)? {
                    HookSignal::Continue => {}
                    HookSignal::SetLearningRate(lr) => adam.set_learning_rate(lr),
                    HookSignal::Stop => stop = true,
                }
            }

            pb.inc(1);

            if verbose {
                match val_loss {
                    Some(v) => info!("[{}] loss: {}, val_loss: {}", epoch + 1, loss, v),
                    None => info!("[{}] loss: {}", epoch + 1, loss),
                }
            }

            if stop {
                break;
            }
        }
        pb.finish_and_clear();

        self.state = ModelState::Trained;
        Ok(history)
    }

    /// Load the rows in chunks and apply `f` to each chunk
    fn predict_chunks<X, F>(&self, x: &X, mut f: F) -> Result<()>
    where
        X: RowsToTensorVec + ?Sized,
        F: FnMut(&Tensor) -> Result<()>,
    {
        let x_nd = x.to_tensor_on(&self.device)?;
        let n = x_nd.dim(0)?;
        for lb in (0..n).step_by(PREDICT_BATCH) {
            let len = PREDICT_BATCH.min(n - lb);
            f(&x_nd.narrow(0, lb, len)?)?;
        }
        Ok(())
    }

    fn check_inputs<X, Y>(&self, x: &X, y: Option<&Y>) -> Result<()>
    where
        X: RowsToTensorVec + ?Sized,
        Y: RowsToTensorVec + ?Sized,
    {
        if x.num_rows() == 0 {
            return Err(VccaError::EmptyInput("no samples"));
        }
        if let Some(y) = y {
            self.check_rows(x.num_rows(), y.num_rows())?;
            self.check_cols("number of features in y", self.config.input_size_y, y.num_cols())?;
        } else if N::PRIVATE_LATENT {
            return Err(VccaError::MissingModality("y"));
        }
        self.check_cols("number of features in x", self.config.input_size_x, x.num_cols())
    }

    /// Shared latent means of `x` (samples x latent_size)
    pub fn integrate<X>(&self, x: &X) -> Result<Tensor>
    where
        X: RowsToTensorVec + ?Sized,
    {
        let network = self.trained_network("integrate")?;
        if x.num_rows() == 0 {
            return Err(VccaError::EmptyInput("no samples"));
        }
        self.check_cols("number of features in x", self.config.input_size_x, x.num_cols())?;

        let mut chunks = vec![];
        self.predict_chunks(x, |x_nd| {
            chunks.push(network.encode_shared(x_nd)?);
            Ok(())
        })?;
        Ok(Tensor::cat(&chunks, 0)?)
    }

    fn encode_all<X, Y>(&self, network: &N, x: &X, y: Option<&Y>) -> Result<ComposedLatent>
    where
        X: RowsToTensorVec + ?Sized,
        Y: RowsToTensorVec + ?Sized,
    {
        let x_nd = x.to_tensor_on(&self.device)?;
        let y_nd = match y {
            Some(y) => Some(y.to_tensor_on(&self.device)?),
            None => None,
        };
        let n = x_nd.dim(0)?;

        let mut shared = vec![];
        let mut private_x = vec![];
        let mut private_y = vec![];
        for lb in (0..n).step_by(PREDICT_BATCH) {
            let len = PREDICT_BATCH.min(n - lb);
            let x_b = x_nd.narrow(0, lb, len)?;
            let y_b = match y_nd.as_ref() {
                Some(y_nd) => Some(y_nd.narrow(0, lb, len)?),
                None => None,
            };
            let latent = network.encode_means(&x_b, y_b.as_ref())?;
            shared.push(latent.shared);
            private_x.extend(latent.private_x);
            private_y.extend(latent.private_y);
        }

        let cat = |v: Vec<Tensor>| -> Result<Option<Tensor>> {
            if v.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Tensor::cat(&v, 0)?))
            }
        };

        Ok(ComposedLatent {
            shared: Tensor::cat(&shared, 0)?,
            private_x: cat(private_x)?,
            private_y: cat(private_y)?,
        })
    }

    /// Shared and private latent means
    ///
    /// The private variant needs both `x` and `y`; the shared-only
    /// variant ignores `y` and leaves the private parts empty.
    pub fn integrate_compose<X, Y>(&self, x: &X, y: Option<&Y>) -> Result<ComposedLatent>
    where
        X: RowsToTensorVec + ?Sized,
        Y: RowsToTensorVec + ?Sized,
    {
        let network = self.trained_network("integrate_compose")?;
        self.check_inputs(x, y)?;
        self.encode_all(network, x, y)
    }

    /// Reconstruct X and Y by decoding the latent means
    pub fn get_output<X, Y>(&self, x: &X, y: Option<&Y>) -> Result<(Tensor, Tensor)>
    where
        X: RowsToTensorVec + ?Sized,
        Y: RowsToTensorVec + ?Sized,
    {
        let network = self.trained_network("get_output")?;
        self.check_inputs(x, y)?;
        let latent = self.encode_all(network, x, y)?;
        Ok(network.decode_means(&latent)?)
    }

    /// Save every variable into a safetensors file
    pub fn save_weights(&self, file: &Path) -> Result<()> {
        self.require(
            "save_weights",
            &[ModelState::Built, ModelState::Compiled, ModelState::Trained],
        )?;
        self.parameters.save(file)?;
        Ok(())
    }

    /// Read weights saved by the checkpoint hook (or `save_weights`)
    /// into a built model; the model is compiled if it was not yet and
    /// becomes trained.
    pub fn load_weights(&mut self, file: &Path) -> Result<()> {
        self.require(
            "load_weights",
            &[ModelState::Built, ModelState::Compiled, ModelState::Trained],
        )?;
        if self.state == ModelState::Built {
            self.compile()?;
        }
        self.parameters.load(file)?;
        info!("loaded weights from {}", file.display());
        self.state = ModelState::Trained;
        Ok(())
    }
}
