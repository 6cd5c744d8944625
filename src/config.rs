use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Fixed window a dispatched command may wait for its reply.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest single inbound frame accepted from an agent.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;
/// Largest reassembled inbound message accepted from an agent.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
/// Interval between keep-alive pings on agent channels.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Parser, Clone)]
#[command(name = "device-relay")]
#[command(about = "Relays commands from a control plane to remote device agents over WebSocket")]
pub struct Config {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Directory holding the launch.html bootstrap page.
    #[arg(long, default_value = "public")]
    pub public_dir: PathBuf,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit relay lifecycle events as JSON lines on stderr.
    #[arg(long, default_value_t = false)]
    pub json_output: bool,

    #[command(subcommand)]
    pub command: Option<Subcommands>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Subcommands {
    /// Run the HTTP + WebSocket relay (default).
    Serve,
    /// Print a launch page URL carrying a fresh (or given) client id.
    LaunchUrl {
        /// Base URL of the relay (default: derived from --host/--port).
        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        client_id: Option<String>,
    },
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.bind_addr())
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions::default()
    }
}

/// Relay-internal limits. The request timeout is fixed for the life of a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    pub request_timeout: Duration,
    pub max_frame_size: usize,
    pub max_message_size: usize,
    pub keepalive_interval: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
            max_frame_size: MAX_FRAME_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            keepalive_interval: KEEPALIVE_INTERVAL,
        }
    }
}
