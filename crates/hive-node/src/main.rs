//! hive-node — the hive coordinator binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the state database
//!   2. Connect to the Lightning node and learn our identity pubkey
//!   3. Start the P2P transport (libp2p GossipSub + Kademlia)
//!   4. Start the JSON-RPC 2.0 server
//!   5. Spawn the dispatcher and the periodic cooperative tasks

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use hive_core::types::PeerId;
use hive_core::{HiveConfig, IdentityMode};
use hive_gossip::{Deduplicator, IntentRegistry, MemberTable, Relay};
use hive_identity::{IdentityAdapter, LocalIdentity, RemoteIdentity};
use hive_lightning::{HttpLightningRpc, LightningRpc};
use hive_mgmt::ManagementManager;
use hive_p2p::{P2pConfig, P2pNetwork};
use hive_reputation::CredentialManager;
use hive_rpc::{RpcServer, RpcServerState};
use hive_settlement::SettlementEngine;
use hive_state::StateDb;
use hive_wire::message::{HelloPayload, HiveMessage};

use hive_node::dispatch::Dispatcher;
use hive_node::logging::BatchedLogWriter;
use hive_node::tasks::Ticker;

#[derive(Parser, Debug)]
#[command(
    name = "hive-node",
    version,
    about = "Hive coordinator — cooperative fleet management for Lightning nodes"
)]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.hive/data")]
    data_dir: PathBuf,

    /// Path to the hive configuration JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// P2P listen address.
    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/9736")]
    p2p_listen: String,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:9737")]
    rpc_addr: SocketAddr,

    /// Bootstrap peer multiaddresses (comma-separated).
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_writer = BatchedLogWriter::spawn();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hive=debug".parse().unwrap()),
        )
        .with_writer(log_writer)
        .init();

    let args = Args::parse();
    info!("hive node starting");

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config from {}", path.display()))?;
            HiveConfig::from_json(&json).context("parsing hive config JSON")?
        }
        None => HiveConfig::default(),
    };

    // ── State database ────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = Arc::new(StateDb::open(&data_dir).context("opening state database")?);

    // ── Lightning node & identity ─────────────────────────────────────────────
    let lightning: Arc<dyn LightningRpc> =
        Arc::new(HttpLightningRpc::new(&config.lightning_rpc_url));
    let node_info = lightning
        .getinfo()
        .await
        .context("querying the Lightning node for our identity")?;
    let our_pubkey = PeerId::new(node_info.id);
    info!(pubkey = %our_pubkey.short(), alias = %node_info.alias, "node identity");

    let identity: Arc<dyn IdentityAdapter> = match config.identity_mode {
        IdentityMode::Local => Arc::new(LocalIdentity::new(Arc::clone(&lightning))),
        IdentityMode::Remote => {
            let url = config
                .remote_signer_url
                .as_deref()
                .context("identity_mode=remote requires remote_signer_url")?;
            Arc::new(RemoteIdentity::new(url, Arc::clone(&lightning)))
        }
    };

    // ── Core components ───────────────────────────────────────────────────────
    let members = Arc::new(MemberTable::new(Arc::clone(&db), our_pubkey.clone()));
    let dedup = Arc::new(Deduplicator::new());
    let relay = Arc::new(Relay::new(our_pubkey.clone(), config.relay_ttl_default));
    let intents = Arc::new(IntentRegistry::new(our_pubkey.clone()));
    let reputation = Arc::new(CredentialManager::new(
        Arc::clone(&db),
        Arc::clone(&identity),
        our_pubkey.clone(),
    ));
    let mgmt = Arc::new(ManagementManager::new(
        Arc::clone(&db),
        Arc::clone(&identity),
        our_pubkey.clone(),
    ));
    let engine = Arc::new(SettlementEngine::new(
        Arc::clone(&db),
        Arc::clone(&identity),
        Arc::clone(&lightning),
        Arc::clone(&reputation),
        our_pubkey.clone(),
    ));

    // ── P2P transport ─────────────────────────────────────────────────────────
    let p2p_config = P2pConfig {
        listen_addr: args.p2p_listen.clone(),
        bootstrap_peers: args.bootstrap.clone(),
        ..P2pConfig::default()
    };
    let (p2p_network, mut p2p_handle) =
        P2pNetwork::new(&p2p_config).map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %p2p_handle.local_peer_id, "P2P transport identity");
    let outbound_tx = p2p_handle.outbound_tx.clone();
    tokio::spawn(async move { p2p_network.run().await });

    // Merge transport inbound with RPC-injected packets into one dispatch
    // queue; a single consumer keeps per-sender ordering.
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel(512);
    let transport_feed = dispatch_tx.clone();
    tokio::spawn(async move {
        while let Some(envelope) = p2p_handle.inbound_rx.recv().await {
            if transport_feed.send(envelope).await.is_err() {
                break;
            }
        }
    });

    let dispatcher = Arc::new(Dispatcher {
        db: Arc::clone(&db),
        identity: Arc::clone(&identity),
        members: Arc::clone(&members),
        dedup: Arc::clone(&dedup),
        relay: Arc::clone(&relay),
        reputation: Arc::clone(&reputation),
        mgmt: Arc::clone(&mgmt),
        engine: Arc::clone(&engine),
        intents: Arc::clone(&intents),
        our_pubkey: our_pubkey.clone(),
        outbound_tx: outbound_tx.clone(),
    });

    let dispatch_loop = Arc::clone(&dispatcher);
    tokio::spawn(async move {
        while let Some(envelope) = dispatch_rx.recv().await {
            dispatch_loop.handle_envelope(envelope).await;
        }
    });

    // ── Join the hive ─────────────────────────────────────────────────────────
    if let Err(e) = engine.ensure_own_offer().await {
        warn!(error = %e, "could not auto-register settlement offer");
    }
    let snapshot = db.get_peer_state(&our_pubkey).ok().flatten().unwrap_or_default();
    dispatcher
        .broadcast(HiveMessage::Hello(HelloPayload {
            capacity_sats: snapshot.capacity_sats,
            forward_count: snapshot.forward_count,
            ts: hive_core::types::now_ts(),
        }))
        .await;

    // ── RPC server ────────────────────────────────────────────────────────────
    let rpc_state = Arc::new(RpcServerState {
        db: Arc::clone(&db),
        config: config.clone(),
        our_pubkey: our_pubkey.clone(),
        identity: Arc::clone(&identity),
        engine: Arc::clone(&engine),
        reputation: Arc::clone(&reputation),
        mgmt: Arc::clone(&mgmt),
        intents: Arc::clone(&intents),
        relay: Arc::clone(&relay),
        lightning: Arc::clone(&lightning),
        outbound_tx: outbound_tx.clone(),
        inbound_tx: Some(dispatch_tx.clone()),
    });
    let _rpc_handle = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    // ── Periodic tasks ────────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    Ticker {
        dispatcher: Arc::clone(&dispatcher),
        config: config.clone(),
        stop: stop_rx,
    }
    .spawn_all();

    info!("node ready");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    let _ = stop_tx.send(true);
    db.flush().ok();

    Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
