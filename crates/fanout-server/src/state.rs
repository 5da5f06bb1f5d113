use crate::sfu::{Connector, SfuSessionManager};
use anyhow::Context;
use fanout_protocol::IceServer;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
const DEFAULT_RENEGOTIATE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    /// How long `GET /renegotiate` waits for an offer
    pub renegotiate_timeout: Duration,
    pub ice_gather_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: vec![],
            renegotiate_timeout: DEFAULT_RENEGOTIATE_TIMEOUT,
            ice_gather_timeout: DEFAULT_ICE_GATHER_TIMEOUT,
        }
    }
}

impl Config {
    /// Load from environment variables
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Config::default();

        let bind_address = lookup("BIND_ADDRESS").unwrap_or(defaults.bind_address);

        let stun_servers = lookup("STUN_SERVERS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.stun_servers);

        let turn_servers = match lookup("TURN_URL") {
            Some(url) => vec![TurnServer {
                url,
                username: lookup("TURN_USERNAME").unwrap_or_default(),
                credential: lookup("TURN_CREDENTIAL").unwrap_or_default(),
            }],
            None => vec![],
        };

        let renegotiate_timeout = millis(&lookup, "RENEGOTIATE_TIMEOUT_MS")?
            .unwrap_or(defaults.renegotiate_timeout);
        let ice_gather_timeout = millis(&lookup, "ICE_GATHER_TIMEOUT_MS")?
            .unwrap_or(defaults.ice_gather_timeout);

        Ok(Config {
            bind_address,
            stun_servers,
            turn_servers,
            renegotiate_timeout,
            ice_gather_timeout,
        })
    }

    /// STUN servers first, then TURN, in the shape handed to both the relay's
    /// own connections and to clients
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let stun = self.stun_servers.iter().map(|url| IceServer {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        });
        let turn = self.turn_servers.iter().map(|turn| IceServer {
            urls: vec![turn.url.clone()],
            username: Some(turn.username.clone()),
            credential: Some(turn.credential.clone()),
        });
        stun.chain(turn).collect()
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<Duration>> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("{key} must be a number of milliseconds, got {value:?}"))
        })
        .transpose()
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sfu: Arc<SfuSessionManager>,
}

impl AppState {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        let sfu = Arc::new(SfuSessionManager::new(
            connector,
            config.renegotiate_timeout,
        ));

        Self { config, sfu }
    }
}
