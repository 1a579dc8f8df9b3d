/// Main entry point
///
/// Thin wrapper around `cli::run`; a failure exits with status 1.
use toy_exchange::cli;

fn main() {
    if let Err(e) = cli::run() {
        tracing::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
