use chunk_proxy::client::tcp::TcpClientFactory;
use chunk_proxy::prelude::*;
use chunk_proxy::server::Server;
use signal_hook::consts::{SIGHUP, SIGINT, SIGPIPE, SIGTERM, SIGUSR1, SIGUSR2};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&shutdown))?;
    }
    // absorbed without effect
    let ignored = Arc::new(AtomicBool::new(false));
    for sig in [SIGPIPE, SIGHUP, SIGUSR1, SIGUSR2] {
        signal_hook::flag::register(sig, Arc::clone(&ignored))?;
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        return Err("usage: chunk_proxy FILE [FILE...]".into());
    }
    let config = AppConfig::load(args);

    let factory: Arc<dyn ClientFactory> = Arc::new(TcpClientFactory::new());
    let mut server = Server::new(&config, factory, Arc::clone(&shutdown))?;
    server.run()?;

    info!("exiting");
    Ok(())
}
