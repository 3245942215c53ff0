use clap::Parser;
use kube::CustomResourceExt;
use secret_rotator::{config::RunArgs, crds::SecretRotation};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
enum Args {
    /// Run the controller
    Run(RunArgs),
    /// Print the SecretRotation CRD
    Crds,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args {
        Args::Crds => {
            println!("{}", serde_yaml::to_string(&SecretRotation::crd())?);
        }
        Args::Run(run_args) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();

            secret_rotator::run(run_args).await?;
        }
    };

    Ok(())
}
