use std::env;

use clap::{App, Arg};
use log::{info, warn};
use tokio::net::TcpListener;

use tunnel::config;
use tunnel::server::{self, Server};

fn init_logger() {
    let filters = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("server")
        .about("Relays TCP connections to backends named by encrypted tokens")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("YAML config file"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .takes_value(true)
                .help("listen port, 4043 by default"),
        )
        .get_matches();

    init_logger();

    let mut cfg = config::load(matches.value_of("config"))?;
    if let Some(port) = matches.value_of("port") {
        cfg.port = port.parse()?;
    }
    cfg.validate();

    if let Err(err) = server::raise_nofile_limit(cfg.max_open_files) {
        warn!("keeping current open file limit: {}", err);
    }

    let listen = TcpListener::bind(cfg.listen_addr()).await?;
    info!("address cache holds up to {} tokens", cfg.max_cache_entries);
    Server::new(&cfg).serve(listen).await;
    Ok(())
}
