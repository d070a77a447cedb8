//! Errors raised by the paired VAE models.

use crate::candle_vcca_inference::ModelState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VccaError>;

#[derive(Debug, Error)]
pub enum VccaError {
    /// Invalid construction parameters, caught before `build()`
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Input matrices that disagree with each other or with the model
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An operation called before the model reached the state it needs
    #[error("`{operation}` requires a {required} model, but the model is {actual}")]
    State {
        operation: &'static str,
        required: ModelState,
        actual: ModelState,
    },

    /// Training loss turned into NaN or infinity
    #[error("numerical instability at epoch {epoch}: loss = {loss}")]
    NumericalInstability { epoch: usize, loss: f32 },

    /// A modality the variant needs was not provided
    #[error("missing input modality: {0}")]
    MissingModality(&'static str),

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VccaError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
