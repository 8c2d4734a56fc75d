use clap::Parser;
use localresp::config::{Config, DEFAULT_MAX_ACCEPT_FAILURES, DEFAULT_MAX_FRAME_SIZE};
use localresp::server::Server;
use localresp::Error;
use tracing::{debug, Level};

const BIND: &str = "127.0.0.1:8099";

#[derive(Parser, Debug)]
struct Args {
    /// The address to listen on
    #[arg(short, long, env = "LOCALRESP_BIND", default_value = BIND)]
    bind: String,

    /// Largest frame a client may send, in bytes
    #[arg(long, env = "LOCALRESP_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Failed accepts tolerated before the server exits
    #[arg(long, default_value_t = DEFAULT_MAX_ACCEPT_FAILURES)]
    max_accept_failures: usize,

    /// Reply `-1` instead of `$-1` for missing values
    #[arg(long, env = "LOCALRESP_LEGACY_NULL")]
    legacy_null: bool,

    #[arg(long, env = "LOCALRESP_LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let _ = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let config = Config {
        max_frame_size: args.max_frame_size,
        max_accept_failures: args.max_accept_failures,
        legacy_null: args.legacy_null,
    };

    Server::new(config).listen_and_serve(&args.bind).await?;

    Ok(())
}
