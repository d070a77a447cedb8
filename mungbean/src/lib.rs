pub mod fit_integration;
pub mod mungbean_input;
pub mod simulate;

pub use fit_integration::{
    fit_integration, run_integration, FitIntegrationArgs, IntegrationMode, IntegrationOut,
};
