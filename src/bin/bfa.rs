/// bfa command line
///
/// Translates expressions, compiles script files and runs them against an
/// in-memory repository. Useful for checking scripts without a host runtime.

use bfa_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
