use crate::candle_aux_linear::WeightInit;
use crate::candle_vcca_error::{Result, VccaError};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Learning rate decay when the training loss stops improving
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    pub min_delta: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.8,
            patience: 10,
            min_lr: 1e-4,
            min_delta: 1e-4,
        }
    }
}

/// Construction parameters of the paired VAE models
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VccaConfig {
    pub input_size_x: usize,
    pub input_size_y: usize,

    /// widths of the encoder blocks (the decoder uses them reversed)
    pub hidden_widths: Vec<usize>,
    /// shared latent dimension
    pub latent_size: usize,
    /// private latent dimension of each modality (PVCCA only)
    pub private_latent_size: usize,

    /// dropout of encoder blocks
    pub dropout_rate_small: f32,
    /// dropout of decoder blocks
    pub dropout_rate_big: f32,

    /// directory for checkpoint, log and config files
    pub path: PathBuf,
    pub validation_split: f32,
    /// early stopping patience in epochs
    pub patience: usize,
    /// stored only
    pub batch_num: usize,
    /// stored only
    pub deterministic: bool,

    pub learning_rate: f64,
    pub kernel_l1: f64,
    pub kernel_l2: f64,
    pub weight_init: WeightInit,

    /// fixed reconstruction multipliers (PVCCA only)
    pub recon_weight_x: f64,
    pub recon_weight_y: f64,

    pub lr_plateau: PlateauConfig,

    pub show_progress: bool,
    pub verbose: bool,
}

impl VccaConfig {
    /// Shared-only defaults
    ///
    /// * `input_size_x` - number of features in X
    /// * `input_size_y` - number of features in Y
    /// * `hidden_widths` - encoder widths
    /// * `latent_size` - shared latent dimension
    pub fn vcca(
        input_size_x: usize,
        input_size_y: usize,
        hidden_widths: &[usize],
        latent_size: usize,
    ) -> Self {
        Self {
            input_size_x,
            input_size_y,
            hidden_widths: hidden_widths.to_vec(),
            latent_size,
            private_latent_size: 0,
            dropout_rate_small: 0.0,
            dropout_rate_big: 0.05,
            path: PathBuf::from("."),
            validation_split: 0.0,
            patience: 60,
            batch_num: 0,
            deterministic: false,
            learning_rate: 1e-3,
            kernel_l1: 0.01,
            kernel_l2: 0.01,
            weight_init: WeightInit::GlorotUniform,
            recon_weight_x: 10.,
            recon_weight_y: 2000.,
            lr_plateau: PlateauConfig::default(),
            show_progress: true,
            verbose: false,
        }
    }

    /// Private+shared defaults: widths `[128, 64, 32]`, shared latent 5,
    /// private latent 2
    pub fn pvcca(input_size_x: usize, input_size_y: usize) -> Self {
        Self {
            private_latent_size: 2,
            dropout_rate_small: 0.01,
            batch_num: 2,
            weight_init: WeightInit::GlorotNormal,
            ..Self::vcca(input_size_x, input_size_y, &[128, 64, 32], 5)
        }
    }

    /// Take a combined schedule whose last entry is the shared latent
    /// size, e.g. `[128, 64, 32, 5]`
    pub fn with_schedule(mut self, schedule: &[usize]) -> Result<Self> {
        match schedule.split_last() {
            Some((&latent, widths)) if !widths.is_empty() => {
                self.hidden_widths = widths.to_vec();
                self.latent_size = latent;
                Ok(self)
            }
            _ => Err(VccaError::configuration(format!(
                "hidden-layer schedule needs at least two entries, got {:?}",
                schedule
            ))),
        }
    }

    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    pub fn validate(&self, private_latent: bool) -> Result<()> {
        if self.input_size_x == 0 || self.input_size_y == 0 {
            return Err(VccaError::configuration(format!(
                "input sizes must be positive: x = {}, y = {}",
                self.input_size_x, self.input_size_y
            )));
        }
        if self.hidden_widths.is_empty() {
            return Err(VccaError::configuration("empty hidden widths"));
        }
        if self.hidden_widths.iter().any(|&w| w == 0) {
            return Err(VccaError::configuration(format!(
                "zero width in hidden widths {:?}",
                self.hidden_widths
            )));
        }
        if self.latent_size == 0 {
            return Err(VccaError::configuration("latent size must be positive"));
        }
        if private_latent && self.private_latent_size == 0 {
            return Err(VccaError::configuration(
                "private latent size must be positive",
            ));
        }
        for (name, rate) in [
            ("dropout_rate_small", self.dropout_rate_small),
            ("dropout_rate_big", self.dropout_rate_big),
            ("validation_split", self.validation_split),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(VccaError::configuration(format!(
                    "{} must be in [0, 1), got {}",
                    name, rate
                )));
            }
        }
        if !(self.learning_rate > 0.) {
            return Err(VccaError::configuration(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.kernel_l1 < 0. || self.kernel_l2 < 0. {
            return Err(VccaError::configuration("negative kernel penalty"));
        }
        Ok(())
    }

    /// Write as pretty json
    pub fn to_json(&self, file: &std::path::Path) -> anyhow::Result<()> {
        let mut writer = matrix_util::common_io::open_buf_writer(&file.to_string_lossy())?;
        serde_json::to_writer_pretty(&mut writer, self)?;
        std::io::Write::flush(&mut writer)?;
        Ok(())
    }

    pub fn from_json(file: &std::path::Path) -> anyhow::Result<Self> {
        let reader = matrix_util::common_io::open_buf_reader(&file.to_string_lossy())?;
        Ok(serde_json::from_reader(reader)?)
    }
}
