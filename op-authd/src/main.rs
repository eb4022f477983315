use std::process;

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = op_authd::cli::Cli::parse();
    op_authd::telemetry::init(cli.verbose);

    if let Err(err) = op_authd::run(cli).await {
        eprintln!("op-authd exited with error: {err:#}");
        process::exit(1);
    }
}
