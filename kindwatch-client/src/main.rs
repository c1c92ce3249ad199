use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = kindwatch_client::Cli::parse();
    if let Err(e) = kindwatch_client::run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
