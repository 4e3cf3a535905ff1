use clap::Parser;
use peer_mesh::config::{apply_turn_credentials, IceServer, DEFAULT_RELAY_URL};
use peer_mesh::telemetry::logging::LoggingArgs;
use peer_mesh::LinkConfig;

#[derive(Parser, Debug)]
#[command(name = "mesh-chat")]
#[command(about = "Chat with everyone on a signaling relay over direct peer links")]
pub struct Cli {
    #[arg(
        long,
        env = "MESH_RELAY_URL",
        default_value = DEFAULT_RELAY_URL,
        help = "WebSocket URL of the signaling relay"
    )]
    pub relay: String,

    #[arg(
        long = "ice-server",
        value_name = "URL",
        help = "STUN/TURN server URL; repeat for several (defaults to MESH_ICE_SERVERS or a public STUN server)"
    )]
    pub ice_servers: Vec<String>,

    #[arg(long, env = "MESH_TURN_USERNAME", help = "Username for TURN servers")]
    pub turn_username: Option<String>,

    #[arg(
        long,
        env = "MESH_TURN_CREDENTIAL",
        hide_env_values = true,
        help = "Credential for TURN servers"
    )]
    pub turn_credential: Option<String>,

    #[arg(long, help = "Use host candidates only, with no ICE servers")]
    pub localhost_only: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    pub fn link_config(&self) -> LinkConfig {
        let mut config = if self.localhost_only {
            LinkConfig::localhost()
        } else {
            LinkConfig::from_env()
        };
        if !self.localhost_only && !self.ice_servers.is_empty() {
            config.ice_servers = self
                .ice_servers
                .iter()
                .map(|url| IceServer::new(vec![url.clone()]))
                .collect();
        }
        apply_turn_credentials(
            &mut config.ice_servers,
            self.turn_username.clone(),
            self.turn_credential.clone(),
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mesh-chat").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn explicit_ice_servers_replace_defaults_and_get_turn_credentials() {
        let cli = parse(&[
            "--relay",
            "ws://relay.example:8514",
            "--ice-server",
            "stun:stun.example:3478",
            "--ice-server",
            "turn:turn.example:3478",
            "--turn-username",
            "alice",
            "--turn-credential",
            "s3cret",
        ]);
        assert_eq!(cli.relay, "ws://relay.example:8514");
        let config = cli.link_config();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].username, None);
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("alice"));
        assert_eq!(config.ice_servers[1].credential.as_deref(), Some("s3cret"));
    }

    #[test]
    fn localhost_only_ignores_ice_servers() {
        let cli = parse(&["--localhost-only", "--ice-server", "stun:stun.example:3478"]);
        assert!(cli.link_config().ice_servers.is_empty());
    }
}
