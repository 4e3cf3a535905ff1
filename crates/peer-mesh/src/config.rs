use std::env;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8514";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "data";

/// One STUN/TURN endpoint group. Credentials are opaque and only meaningful for TURN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            ..Default::default()
        }
    }

    fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|url| url.starts_with("turn:") || url.starts_with("turns:"))
    }
}

/// Configuration handed to the link factory for every direct link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// ICE servers used while gathering candidates
    pub ice_servers: Vec<IceServer>,
    /// Label of the data channel the offerer opens
    pub data_channel_label: String,
    pub ordered: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::new(vec![DEFAULT_STUN_SERVER.to_string()])],
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            ordered: true,
        }
    }
}

impl LinkConfig {
    /// Host candidates only, for peers on the same machine or LAN.
    pub fn localhost() -> Self {
        Self {
            ice_servers: vec![],
            ..Default::default()
        }
    }

    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::default()
    }

    pub fn from_env() -> Self {
        if env_flag("MESH_LOCALHOST_ONLY") {
            return Self::localhost();
        }
        let mut config = Self::default();
        if let Ok(raw) = env::var("MESH_ICE_SERVERS") {
            let urls = parse_ice_urls(&raw);
            if !urls.is_empty() {
                config.ice_servers = urls.into_iter().map(|url| IceServer::new(vec![url])).collect();
            }
        }
        apply_turn_credentials(
            &mut config.ice_servers,
            env::var("MESH_TURN_USERNAME").ok(),
            env::var("MESH_TURN_CREDENTIAL").ok(),
        );
        config
    }
}

#[derive(Debug, Default)]
pub struct LinkConfigBuilder {
    ice_servers: Vec<IceServer>,
    data_channel_label: Option<String>,
    ordered: Option<bool>,
}

impl LinkConfigBuilder {
    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(IceServer::new(urls));
        self
    }

    pub fn add_ice_server_with_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers.push(IceServer {
            urls,
            username: Some(username),
            credential: Some(credential),
        });
        self
    }

    pub fn data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = Some(label.into());
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = Some(ordered);
        self
    }

    pub fn build(self) -> LinkConfig {
        let defaults = LinkConfig::localhost();
        LinkConfig {
            ice_servers: self.ice_servers,
            data_channel_label: self
                .data_channel_label
                .unwrap_or(defaults.data_channel_label),
            ordered: self.ordered.unwrap_or(defaults.ordered),
        }
    }
}

/// Engine-level configuration: where the relay lives and how links are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    pub relay_url: String,
    pub link: LinkConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            link: LinkConfig::default(),
        }
    }
}

impl MeshConfig {
    pub fn from_env() -> Self {
        Self {
            relay_url: env::var("MESH_RELAY_URL")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string()),
            link: LinkConfig::from_env(),
        }
    }
}

pub fn parse_ice_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

/// Attaches relay-assist credentials to every TURN entry that has none of its own.
pub fn apply_turn_credentials(
    servers: &mut [IceServer],
    username: Option<String>,
    credential: Option<String>,
) {
    let (Some(username), Some(credential)) = (username, credential) else {
        return;
    };
    for server in servers.iter_mut().filter(|server| server.is_turn()) {
        if server.username.is_none() && server.credential.is_none() {
            server.username = Some(username.clone());
            server.credential = Some(credential.clone());
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_url_list_skips_blanks() {
        assert_eq!(
            parse_ice_urls(" stun:a:3478, ,turn:b:3478 ,"),
            vec!["stun:a:3478".to_string(), "turn:b:3478".to_string()]
        );
        assert!(parse_ice_urls("").is_empty());
    }

    #[test]
    fn turn_credentials_only_touch_turn_entries() {
        let mut servers = vec![
            IceServer::new(vec!["stun:a:3478".into()]),
            IceServer::new(vec!["turn:b:3478".into()]),
            IceServer {
                urls: vec!["turns:c:5349".into()],
                username: Some("own".into()),
                credential: Some("secret".into()),
            },
        ];
        apply_turn_credentials(&mut servers, Some("user".into()), Some("pass".into()));
        assert_eq!(servers[0].username, None);
        assert_eq!(servers[1].username.as_deref(), Some("user"));
        assert_eq!(servers[1].credential.as_deref(), Some("pass"));
        assert_eq!(servers[2].username.as_deref(), Some("own"));

        let mut untouched = vec![IceServer::new(vec!["turn:b:3478".into()])];
        apply_turn_credentials(&mut untouched, Some("user".into()), None);
        assert_eq!(untouched[0].username, None);
    }

    #[test]
    fn builder_starts_without_ice_servers() {
        let config = LinkConfig::builder()
            .add_ice_server_with_credentials(
                vec!["turn:relay.example:3478".into()],
                "u".into(),
                "c".into(),
            )
            .data_channel_label("chat")
            .build();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.data_channel_label, "chat");
        assert!(config.ordered);

        let default = LinkConfig::default();
        assert_eq!(default.data_channel_label, DEFAULT_DATA_CHANNEL_LABEL);
        assert_eq!(default.ice_servers[0].urls[0], DEFAULT_STUN_SERVER);
        assert!(LinkConfig::localhost().ice_servers.is_empty());
    }
}
