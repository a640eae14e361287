use clap::Parser;
use pixtale::config::setup_logging;
use tracing::error;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = pixtale::cli::CliOptions::parse();

    if setup_logging(cli.debug).is_err() {
        return;
    }

    if let Err(err) = pixtale::web::setup_server(cli.to_config()).await {
        error!("Application error: {}", err);
    }
}
