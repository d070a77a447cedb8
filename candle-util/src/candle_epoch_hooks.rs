use crate::candle_vcca_config::PlateauConfig;

use candle_nn::VarMap;
use log::{info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};

/// file name of the weights checkpoint under the model directory
pub const CHECKPOINT_FILE: &str = "vae_weights.safetensors";

/// What a hook sees at the end of an epoch
pub struct EpochState<'a> {
    /// zero-based epoch index
    pub epoch: usize,
    /// sample-weighted mean training loss
    pub loss: f32,
    pub val_loss: Option<f32>,
    pub learning_rate: f64,
    pub parameters: &'a VarMap,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HookSignal {
    Continue,
    SetLearningRate(f64),
    Stop,
}

/// Something to do after each training epoch
pub trait EpochHook {
    fn name(&self) -> &'static str;

    /// Called at the start of every `train` call
    fn on_train_begin(&mut self) {}

    fn on_epoch_end(&mut self, state: &EpochState) -> anyhow::Result<HookSignal>;
}

/// Save every variable after each epoch
///
/// Writes to a temporary file first and renames it, so the last
/// complete checkpoint survives an interrupted write. Failures are
/// logged and training continues.
pub struct CheckpointHook {
    file: PathBuf,
}

impl CheckpointHook {
    pub fn new(dir: &Path) -> Self {
        Self {
            file: dir.join(CHECKPOINT_FILE),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    fn save(&self, parameters: &VarMap) -> anyhow::Result<()> {
        if let Some(dir) = self.file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.file.with_extension("safetensors.tmp");
        parameters.save(&tmp)?;
        std::fs::rename(&tmp, &self.file)?;
        Ok(())
    }
}

impl EpochHook for CheckpointHook {
    fn name(&self) -> &'static str {
        "checkpoint"
    }

    fn on_epoch_end(&mut self, state: &EpochState) -> anyhow::Result<HookSignal> {
        if let Err(err) = self.save(state.parameters) {
            warn!("failed to save {}: {}", self.file.display(), err);
        }
        Ok(HookSignal::Continue)
    }
}

/// Multiply the learning rate by `factor` after `patience` epochs
/// without an improvement of the training loss larger than
/// `min_delta`; never go below `min_lr`
pub struct ReduceLrOnPlateau {
    config: PlateauConfig,
    best: f32,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(config: PlateauConfig) -> Self {
        Self {
            config,
            best: f32::INFINITY,
            wait: 0,
        }
    }
}

impl EpochHook for ReduceLrOnPlateau {
    fn name(&self) -> &'static str {
        "reduce_lr_on_plateau"
    }

    fn on_train_begin(&mut self) {
        self.best = f32::INFINITY;
        self.wait = 0;
    }

    fn on_epoch_end(&mut self, state: &EpochState) -> anyhow::Result<HookSignal> {
        if state.loss < self.best - self.config.min_delta as f32 {
            self.best = state.loss;
            self.wait = 0;
            return Ok(HookSignal::Continue);
        }

        self.wait += 1;
        if self.wait < self.config.patience || state.learning_rate <= self.config.min_lr {
            return Ok(HookSignal::Continue);
        }

        let lr = (state.learning_rate * self.config.factor).max(self.config.min_lr);
        self.wait = 0;
        info!(
            "[{}] reducing learning rate: {:.3e} -> {:.3e}",
            state.epoch + 1,
            state.learning_rate,
            lr
        );
        Ok(HookSignal::SetLearningRate(lr))
    }
}

/// Stop after `patience` consecutive epochs without improvement of the
/// training loss
pub struct EarlyStopping {
    patience: usize,
    best: f32,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f32::INFINITY,
            wait: 0,
        }
    }
}

impl EpochHook for EarlyStopping {
    fn name(&self) -> &'static str {
        "early_stopping"
    }

    fn on_train_begin(&mut self) {
        self.best = f32::INFINITY;
        self.wait = 0;
    }

    fn on_epoch_end(&mut self, state: &EpochState) -> anyhow::Result<HookSignal> {
        if state.loss < self.best {
            self.best = state.loss;
            self.wait = 0;
            return Ok(HookSignal::Continue);
        }
        self.wait += 1;
        if self.wait >= self.patience && state.epoch > 0 {
            info!(
                "[{}] early stopping: no improvement over {} epochs",
                state.epoch + 1,
                self.wait
            );
            return Ok(HookSignal::Stop);
        }
        Ok(HookSignal::Continue)
    }
}

/// Append one line per epoch to `{dir}/logs/loss.tsv`
pub struct LossLogHook {
    file: PathBuf,
    header_written: bool,
}

impl LossLogHook {
    pub fn new(dir: &Path) -> Self {
        Self {
            file: dir.join("logs").join("loss.tsv"),
            header_written: false,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    fn append(&mut self, state: &EpochState) -> anyhow::Result<()> {
        let file = self.file.to_string_lossy();
        if !self.header_written {
            let mut writer = matrix_util::common_io::open_buf_writer(&file)?;
            writeln!(writer, "epoch\tloss\tval_loss\tlearning_rate")?;
            writer.flush()?;
            self.header_written = true;
        }
        let val_loss = state
            .val_loss
            .map(|v| v.to_string())
            .unwrap_or_else(|| "NA".to_string());
        let mut writer = matrix_util::common_io::open_buf_appender(&file)?;
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            state.epoch + 1,
            state.loss,
            val_loss,
            state.learning_rate
        )?;
        writer.flush()?;
        Ok(())
    }
}

impl EpochHook for LossLogHook {
    fn name(&self) -> &'static str {
        "loss_log"
    }

    fn on_epoch_end(&mut self, state: &EpochState) -> anyhow::Result<HookSignal> {
        if let Err(err) = self.append(state) {
            warn!("failed to log to {}: {}", self.file.display(), err);
        }
        Ok(HookSignal::Continue)
    }
}

/// The hooks every model starts with, in the order they run
pub fn default_hooks(
    dir: &Path,
    plateau: &PlateauConfig,
    patience: usize,
) -> Vec<Box<dyn EpochHook>> {
    vec![
        Box::new(CheckpointHook::new(dir)),
        Box::new(ReduceLrOnPlateau::new(plateau.clone())),
        Box::new(EarlyStopping::new(patience)),
        Box::new(LossLogHook::new(dir)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(hook: &mut dyn EpochHook, losses: &[f32], lr: f64) -> anyhow::Result<Vec<HookSignal>> {
        let parameters = VarMap::new();
        losses
            .iter()
            .enumerate()
            .map(|(epoch, &loss)| {
                hook.on_epoch_end(&EpochState {
                    epoch,
                    loss,
                    val_loss: None,
                    learning_rate: lr,
                    parameters: &parameters,
                })
            })
            .collect()
    }

    #[test]
    fn plateau_decays_after_patience() -> anyhow::Result<()> {
        let mut hook = ReduceLrOnPlateau::new(PlateauConfig {
            patience: 3,
            ..PlateauConfig::default()
        });
        let signals = run(&mut hook, &[5., 4., 4., 4., 4., 4., 4.], 1e-3)?;
        assert_eq!(signals[..4], [HookSignal::Continue; 4]);
        match signals[4] {
            HookSignal::SetLearningRate(lr) => approx::assert_abs_diff_eq!(lr, 8e-4, epsilon = 1e-12),
            other => anyhow::bail!("unexpected {:?}", other),
        }
        // the counter restarts after a reduction
        assert_eq!(signals[5..], [HookSignal::Continue; 2]);
        Ok(())
    }

    #[test]
    fn plateau_respects_floor() -> anyhow::Result<()> {
        let mut hook = ReduceLrOnPlateau::new(PlateauConfig {
            patience: 1,
            ..PlateauConfig::default()
        });
        let signals = run(&mut hook, &[1., 1.], 1.1e-4)?;
        assert_eq!(signals[1], HookSignal::SetLearningRate(1e-4));

        let mut hook = ReduceLrOnPlateau::new(PlateauConfig {
            patience: 1,
            ..PlateauConfig::default()
        });
        let signals = run(&mut hook, &[1., 1., 1.], 1e-4)?;
        assert!(signals.iter().all(|s| *s == HookSignal::Continue));
        Ok(())
    }

    #[test]
    fn early_stopping_counts_stale_epochs() -> anyhow::Result<()> {
        let mut hook = EarlyStopping::new(2);
        let signals = run(&mut hook, &[3., 2., 2.5, 2.1, 1.], 1e-3)?;
        assert_eq!(
            signals,
            vec![
                HookSignal::Continue,
                HookSignal::Continue,
                HookSignal::Continue,
                HookSignal::Stop,
                HookSignal::Continue
            ]
        );

        // a new training run starts counting from scratch
        let mut hook = EarlyStopping::new(2);
        run(&mut hook, &[1., 2.], 1e-3)?;
        hook.on_train_begin();
        let signals = run(&mut hook, &[5., 6.], 1e-3)?;
        assert_eq!(signals, vec![HookSignal::Continue; 2]);

        let mut hook = ReduceLrOnPlateau::new(PlateauConfig {
            patience: 2,
            ..PlateauConfig::default()
        });
        run(&mut hook, &[1., 2.], 1e-3)?;
        hook.on_train_begin();
        let signals = run(&mut hook, &[5., 6.], 1e-3)?;
        assert_eq!(signals, vec![HookSignal::Continue; 2]);

        // zero patience never stops at the first epoch
        let mut hook = EarlyStopping::new(0);
        let signals = run(&mut hook, &[f32::NAN, 1.], 1e-3)?;
        assert_eq!(signals[0], HookSignal::Continue);
        assert_eq!(signals[1], HookSignal::Continue);
        Ok(())
    }

    #[test]
    fn loss_log_and_checkpoint_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut log_hook = LossLogHook::new(dir.path());
        run(&mut log_hook, &[2., 1.], 1e-3)?;
        let text = std::fs::read_to_string(log_hook.file())?;
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "epoch\tloss\tval_loss\tlearning_rate");
        assert!(lines[2].starts_with("2\t1\tNA"));

        let parameters = VarMap::new();
        parameters.get(
            (2, 3),
            "w",
            candle_nn::init::ZERO,
            candle_core::DType::F32,
            &candle_core::Device::Cpu,
        )?;
        let mut ckpt = CheckpointHook::new(&dir.path().join("model"));
        ckpt.on_epoch_end(&EpochState {
            epoch: 0,
            loss: 1.,
            val_loss: Some(2.),
            learning_rate: 1e-3,
            parameters: &parameters,
        })?;
        assert!(ckpt.file().exists());
        Ok(())
    }
}
