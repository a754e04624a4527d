/// Transport configuration.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Multiaddr to listen on, e.g. `/ip4/0.0.0.0/tcp/9735`.
    pub listen_addr: String,
    /// Bootstrap peer multiaddresses.
    pub bootstrap_peers: Vec<String>,
    /// Identify protocol version string.
    pub protocol_version: String,
    /// GossipSub topic carrying hive envelopes.
    pub envelope_topic: String,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/9736".into(),
            bootstrap_peers: Vec::new(),
            protocol_version: "/hive/1.0.0".into(),
            envelope_topic: "hive-envelopes".into(),
        }
    }
}
