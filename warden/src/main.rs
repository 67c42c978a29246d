use args::Args;
use clap::Parser;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    server::logger::init(&args.log_filter);

    let mut config = config::Config::load(&args.config)?;

    if let Some(listen_address) = args.listen_address {
        config.server.listen_address = Some(listen_address);
    }

    server::serve(config).await
}
