pub mod config;
pub mod widget;

use clap::{Parser, Subcommand};

/// Customer chat gateway with hand-off to human agents.
#[derive(Debug, Parser)]
#[command(name = "handoff", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Chat with a running gateway from the terminal.
    Widget {
        /// Gateway base URL.
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        /// Resume an existing session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,
        /// Relay poll interval in milliseconds once an agent has joined.
        #[arg(long, default_value_t = 2000)]
        poll_ms: u64,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `HD_CONFIG` (or `handoff.toml`
/// by default).  A missing file yields the defaults.  Returns the parsed
/// [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(hd_domain::config::Config, String)> {
    let config_path = std::env::var("HD_CONFIG").unwrap_or_else(|_| "handoff.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        hd_domain::config::Config::default()
    };

    Ok((config, config_path))
}
