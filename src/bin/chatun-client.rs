//! Client executable: connect the local TUN to a chatun server.

use clap::Parser;
use std::process;

/// chatun client - route this host through a chatun server
#[derive(Parser)]
#[command(
    name = "chatun-client",
    version,
    about = "Point-to-multipoint IP tunnel client",
    after_help = "Example:\n  sudo chatun-client /etc/chatun/client.toml"
)]
struct Cli {
    /// Config file path
    #[arg(default_value = "/etc/chatun/client.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Minimal output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();

    if let Err(e) = chatun::client::run(&cli.config) {
        log::error!("{}", e);
        process::exit(1);
    }
}
