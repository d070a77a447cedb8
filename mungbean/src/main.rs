use clap::{Parser, Subcommand};
use log::info;
use mungbean::fit_integration::*;
use mungbean::simulate::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "MUNGBEAN",
    long_about = "Multi-modal data integration by variational canonical correlation analysis\n\
		  Paired data files share rows (samples) and differ in columns (features).\n\
		  Dense delimited text (.tsv, .csv, optionally gzipped) or MatrixMarket files."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Integrate paired data by (private) VCCA",
        long_about = "Fit a variational canonical correlation model in three stages: \n\
		      (1) Encode X (and Y) into Gaussian latent states\n\
		      (2) Estimate encoder-decoder architecture via SGD\n\
		      (3) Report latent means on the original data.\n"
    )]
    Fit(FitArgs),

    #[command(
        about = "Simulate paired data with shared and private factors",
        long_about = "Simulate a Gaussian modality X and a Poisson modality Y\n\
		      driven by common shared factors and modality-specific\n\
		      private factors.\n"
    )]
    Simulate(SimArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let verbose = match &cli.commands {
        Commands::Fit(args) => args.verbose,
        Commands::Simulate(args) => args.verbose,
    };
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::Fit(args) => {
            run_fit(args)?;
        }
        Commands::Simulate(args) => {
            run_simulate(args)?;
        }
    }

    info!("Done");
    Ok(())
}
