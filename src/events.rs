use std::io::{self, Write};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub fn init_logging(cfg: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|err| {
        eprintln!(
            "[device-relay] invalid --log-level '{}' ({err}), using info",
            cfg.log_level
        );
        EnvFilter::new("info")
    });
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Lifecycle events of agents and commands, as published on the JSON event stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RelayEvent<'a> {
    AgentRegistered {
        agent_id: &'a str,
        connection: u64,
    },
    AgentSuperseded {
        agent_id: &'a str,
        connection: u64,
        rejected: usize,
    },
    AgentDisconnected {
        agent_id: &'a str,
        connection: u64,
        reason: &'static str,
    },
    CommandSent {
        agent_id: &'a str,
        request_id: &'a str,
        action: &'static str,
    },
    CommandSettled {
        agent_id: &'a str,
        request_id: &'a str,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'static str>,
        elapsed_ms: u64,
    },
}

/// Writes [`RelayEvent`]s as timestamped JSON lines on stderr when enabled.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    json_output: bool,
}

impl EventEmitter {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    pub fn emit(&self, event: RelayEvent<'_>) {
        if !self.json_output {
            return;
        }

        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{}", event_line(&event));
    }
}

fn event_line(event: &RelayEvent<'_>) -> serde_json::Value {
    let mut line = json!({ "ts": Utc::now().to_rfc3339() });
    if let (Some(line), Ok(serde_json::Value::Object(fields))) =
        (line.as_object_mut(), serde_json::to_value(event))
    {
        line.extend(fields);
    }
    line
}
