use serde::{Deserialize, Serialize};

/// Per-epoch trace of a training run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainHistory {
    pub loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub learning_rate: Vec<f64>,
}

impl TrainHistory {
    pub fn len(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    pub fn push(&mut self, loss: f32, val_loss: Option<f32>, learning_rate: f64) {
        self.loss.push(loss);
        if let Some(v) = val_loss {
            self.val_loss.push(v);
        }
        self.learning_rate.push(learning_rate);
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.loss.last().copied()
    }

    /// `epoch  loss  val_loss  learning_rate` lines with a header
    pub fn to_tsv(&self, file: &str) -> anyhow::Result<()> {
        let mut lines = vec!["epoch\tloss\tval_loss\tlearning_rate".to_string()];
        for (e, (loss, lr)) in self.loss.iter().zip(self.learning_rate.iter()).enumerate() {
            let val = self
                .val_loss
                .get(e)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "NA".to_string());
            lines.push(format!("{}\t{}\t{}\t{}", e + 1, loss, val, lr));
        }
        matrix_util::common_io::write_lines(&lines, file)
    }

    /// Text chart of the training loss (`*`) and the validation loss
    /// (`o`) over epochs
    pub fn plot_loss(&self, width: usize, height: usize) -> String {
        let finite = |v: &&f32| v.is_finite();
        let values = self
            .loss
            .iter()
            .chain(self.val_loss.iter())
            .filter(finite)
            .copied()
            .collect::<Vec<_>>();

        if values.is_empty() || width < 2 || height < 2 {
            return String::from("(no loss to plot)\n");
        }

        let lo = values.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let span = if hi > lo { hi - lo } else { 1. };
        let ntot = self.len().max(1);

        let mut grid = vec![vec![' '; width]; height];
        let mut draw = |trace: &[f32], mark: char| {
            for (e, &v) in trace.iter().enumerate() {
                if !v.is_finite() {
                    continue;
                }
                let col = if ntot > 1 {
                    e * (width - 1) / (ntot - 1)
                } else {
                    0
                };
                let row = ((hi - v) / span * (height - 1) as f32).round() as usize;
                grid[row.min(height - 1)][col.min(width - 1)] = mark;
            }
        };
        draw(&self.val_loss, 'o');
        draw(&self.loss, '*');

        let mut out = String::new();
        for (r, line) in grid.iter().enumerate() {
            let label = if r == 0 {
                format!("{:>10.3}", hi)
            } else if r == height - 1 {
                format!("{:>10.3}", lo)
            } else {
                " ".repeat(10)
            };
            out.push_str(&label);
            out.push_str(" |");
            out.extend(line.iter());
            out.push('\n');
        }
        out.push_str(&" ".repeat(11));
        out.push('+');
        out.push_str(&"-".repeat(width));
        out.push('\n');
        out.push_str(&format!("{:>12}{:>w$}\n", 1, ntot, w = width.max(1)));
        out
    }
}
