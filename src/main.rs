//! maxmsg: an echo service on a named request/reply channel.
//!
//! Binds the configured channel over TCP, serves one client and echoes each
//! request back until the client ends the stream.

use maxmsg::channel::TcpChannel;
use maxmsg::config::Config;
use maxmsg::EchoService;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        channel = %config.channel.name,
        request_format = %config.channel.request_format,
        reply_format = %config.channel.reply_format,
        max_msg = config.channel.max_msg,
        "Starting maxmsg echo service"
    );

    // Requests are served one at a time on a single thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let channel = TcpChannel::bind(&config.channel, &config.listen).await?;
    let report = EchoService::from_spec(channel, &config.channel).run().await;

    if !report.is_clean() {
        warn!(reason = %report.cause, "Channel ended with an error");
    }
    if report.failed_sends > 0 {
        warn!(failed_sends = report.failed_sends, "Some replies were not delivered");
    }
    Ok(())
}
