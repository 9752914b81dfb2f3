//! Server executable: accept tunnel clients and gateway them to the
//! Internet.

use clap::Parser;
use std::process;

/// chatun server - terminate tunnels and NAT clients out the default
/// egress interface
#[derive(Parser)]
#[command(
    name = "chatun-server",
    version,
    about = "Point-to-multipoint IP tunnel server",
    after_help = "Example:\n  sudo chatun-server /etc/chatun/server.toml"
)]
struct Cli {
    /// Config file path
    #[arg(default_value = "/etc/chatun/server.toml")]
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

    if let Err(e) = chatun::server::run(&cli.config) {
        log::error!("{}", e);
        process::exit(1);
    }
}
