use std::env;
use std::sync::Arc;

use clap::{App, Arg};
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use tunnel::config;
use tunnel::relay;

fn init_logger() {
    let filters = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();
}

// handle opens a tunnel for one local connection.
async fn handle(stream: TcpStream, server: &str, line: &str) {
    let mut remote = match TcpStream::connect(server).await {
        Ok(remote) => remote,
        Err(err) => {
            warn!("connect {} failed: {}", server, err);
            return;
        }
    };
    let _ = remote.set_nodelay(true);
    if let Err(err) = remote.write_all(line.as_bytes()).await {
        warn!("send token to {} failed: {}", server, err);
        return;
    }
    let first = relay::run(stream, remote).await;
    debug!("tunnel closed, {} finished first", first);
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("client")
        .about("Mints tunnel tokens and forwards local connections through the tunnel")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("YAML config file holding secret and salt"),
        )
        .arg(
            Arg::with_name("server")
                .short("s")
                .long("server")
                .takes_value(true)
                .help("tunnel server address"),
        )
        .arg(
            Arg::with_name("target")
                .short("t")
                .long("target")
                .takes_value(true)
                .required(true)
                .help("backend host:port to reach through the tunnel"),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .takes_value(true)
                .default_value("127.0.0.1:1080")
                .help("local address to accept connections on"),
        )
        .arg(
            Arg::with_name("print")
                .long("print")
                .help("print the token and exit"),
        )
        .get_matches();

    init_logger();

    let cfg = config::load(matches.value_of("config"))?;
    let target = matches.value_of("target").unwrap_or_default();
    let token = cfg.codec().encode(target)?;

    if matches.is_present("print") {
        println!("{}", token);
        return Ok(());
    }

    let server = match matches.value_of("server") {
        Some(server) => server.to_string(),
        None => format!("127.0.0.1:{}", cfg.port),
    };
    let local = matches.value_of("listen").unwrap_or("127.0.0.1:1080");
    let listen = TcpListener::bind(local).await?;
    info!("Client listens at {}, tunneling to {} via {}.", local, target, server);

    let server = Arc::new(server);
    let line = Arc::new(format!("{}\n", token));
    loop {
        let (stream, _) = match listen.accept().await {
            Ok(a) => a,
            Err(err) => {
                warn!("accept failed: {}", err);
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        let server = server.clone();
        let line = line.clone();
        tokio::spawn(async move {
            handle(stream, &server, &line).await;
        });
    }
}
