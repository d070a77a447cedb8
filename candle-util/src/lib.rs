pub mod candle_aux_layers;
pub mod candle_aux_linear;
pub mod candle_data_loader;
pub mod candle_decoder_dense;
pub mod candle_encoder_gaussian;
pub mod candle_epoch_hooks;
pub mod candle_gaussian_sampler;
pub mod candle_loss_composer;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_pvcca;
pub mod candle_train_history;
pub mod candle_vcca;
pub mod candle_vcca_config;
pub mod candle_vcca_error;
pub mod candle_vcca_inference;

pub use candle_core;
pub use candle_nn;
