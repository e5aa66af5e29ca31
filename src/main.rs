use clap::Parser;

use holiday_chatbot::cli::{self, Cli};
use holiday_chatbot::core::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let paths = cli.paths();
    logging::init(&paths);

    cli::run(cli, paths).await
}
