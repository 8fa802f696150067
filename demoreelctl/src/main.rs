use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = demoreelctl::Cli::parse();
    if let Err(err) = demoreelctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
