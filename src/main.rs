use driftless_cli::exec;
use driftless_common::error;

#[tokio::main]
async fn main() {
    if let Err(e) = exec().await {
        error!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
