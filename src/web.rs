#![cfg(not(tarpaulin_include))]

use progress::config::Config;
use progress::server;

/// Entry point of the legacy HTTP backend
///
/// Configuration comes from `PROGRESS_CONFIG` (or `./config.json`) merged over
/// the defaults of `PROGRESS_ENV`. The first argument, if given, overrides the
/// bind address.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::load(None, None).inspect_err(|e| {
        eprintln!("We weren't able to connect to your exercises: {}", e);
    })?;
    if let Some(bind) = std::env::args().nth(1) {
        config.server.bind = bind;
    }

    server::run(&config).await.inspect_err(|e| {
        eprintln!("We weren't able to connect to your exercises: {}", e);
    })
}
