// libpack - multi-format library bundler
// Entry point, all logic lives in the library crate

use libpack::cli::CliHandler;
use libpack::utils::diagnostics::format_error;

#[tokio::main]
async fn main() {
    let handler = CliHandler::new();

    if let Err(e) = handler.run().await {
        eprintln!("{}", format_error(&e));
        std::process::exit(1);
    }
}
