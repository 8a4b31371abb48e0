// ── Runtime hub configuration ──
//
// Describes which channels to open and how to buffer and reconnect.
// Never touches disk: the CLI builds a `HubConfig` from its profile and
// hands it in together with a token provider.

use std::collections::BTreeMap;

use owhub_api::ReconnectConfig;
use url::Url;

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::error::CoreError;
use crate::model::Channel;

/// Path of the streaming endpoint on every backend service.
pub const WEBSOCKET_PATH: &str = "/api/v1/ws";

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// WebSocket endpoint per channel. Channels without one are never
    /// opened, but still have a buffer and registry.
    pub endpoints: BTreeMap<Channel, Url>,
    /// Per-channel event buffer capacity.
    pub buffer_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoints: BTreeMap::new(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl HubConfig {
    /// Set `channel`'s endpoint from a service URL (see [`websocket_endpoint`]).
    pub fn with_service(mut self, channel: Channel, service_url: &str) -> Result<Self, CoreError> {
        let endpoint = websocket_endpoint(service_url)?;
        self.endpoints.insert(channel, endpoint);
        Ok(self)
    }

    pub fn endpoint(&self, channel: Channel) -> Option<&Url> {
        self.endpoints.get(&channel)
    }
}

/// Map a service URL to its streaming endpoint.
///
/// `https://gw.example.com:16002` becomes
/// `wss://gw.example.com:16002/api/v1/ws`. `ws`/`wss` URLs with an
/// explicit path are kept as given.
pub fn websocket_endpoint(service_url: &str) -> Result<Url, CoreError> {
    let mut url = Url::parse(service_url).map_err(owhub_api::Error::from)?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(CoreError::Config {
                message: format!("unsupported scheme '{other}' in {service_url}"),
            });
        }
    };
    let explicit_ws = matches!(url.scheme(), "ws" | "wss") && url.path() != "/";

    url.set_scheme(scheme).map_err(|()| CoreError::Config {
        message: format!("cannot use {service_url} as a WebSocket endpoint"),
    })?;
    if !explicit_ws {
        url.set_path(WEBSOCKET_PATH);
    }
    Ok(url)
}
