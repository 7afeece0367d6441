//! MPC-HC web interface poller.
//!
//! MPC-HC (and MPC-BE) expose playback variables on a local HTTP port as
//! `variables.html`, one `<p id="...">value</p>` tag per variable. Position
//! and duration are already in milliseconds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use minori_core::error::PollError;
use minori_core::source::{PlayerVars, VarsSource};
use minori_core::state::WatchPhase;
use regex::Regex;

use crate::POLL_TIMEOUT;

pub const DEFAULT_MPC_PORT: u16 = 13579;

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<p id="(file|filedir|state|position|duration)">(.+)</p>"#).unwrap()
});

pub struct MpcSource {
    http: reqwest::Client,
    url: String,
}

impl MpcSource {
    pub fn new(port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("http://127.0.0.1:{port}/variables.html"),
        }
    }
}

impl VarsSource for MpcSource {
    fn origin(&self) -> &'static str {
        "mpc"
    }

    async fn poll(&self) -> Result<Option<PlayerVars>, PollError> {
        let response = match self.http.get(&self.url).timeout(POLL_TIMEOUT).send().await {
            Ok(response) => response,
            Err(_) => return Ok(None),
        };
        if !response.status().is_success() {
            return Ok(None);
        }
        let body = response.text().await?;
        parse_variables(&body).map(Some)
    }
}

fn parse_variables(html: &str) -> Result<PlayerVars, PollError> {
    let mut fields = HashMap::new();
    for caps in VARIABLE_RE.captures_iter(html) {
        if let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) {
            fields.insert(key.as_str(), value.as_str());
        }
    }
    let lookup = |name: &'static str| {
        fields
            .get(name)
            .copied()
            .ok_or_else(|| PollError::Protocol(format!("variables.html has no `{name}` field")))
    };

    let state = lookup("state")?;
    let phase = state
        .parse::<i8>()
        .ok()
        .and_then(|code| WatchPhase::try_from(code).ok())
        .ok_or_else(|| PollError::Protocol(format!("unknown state code `{state}`")))?;

    Ok(PlayerVars {
        file: lookup("file")?.to_string(),
        file_dir: PathBuf::from(lookup("filedir")?),
        phase,
        position_ms: parse_ms("position", lookup("position")?)?,
        duration_ms: parse_ms("duration", lookup("duration")?)?,
    })
}

fn parse_ms(name: &str, raw: &str) -> Result<u64, PollError> {
    raw.parse()
        .map_err(|_| PollError::Protocol(format!("{name} is not a number: `{raw}`")))
}
