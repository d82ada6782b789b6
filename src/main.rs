use relay::config::Config;
use relay::server::Server;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let server = Server::bind(cfg)?;

    std::process::exit(server.start());
}
