use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,feather=debug".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    feather::cli::run().await
}
