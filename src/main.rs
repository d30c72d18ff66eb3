//! livetxt binary: the built-in demo agents behind the standard CLI.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    livetxt::cli::run_app(livetxt::demo::demo_catalog()).await
}
