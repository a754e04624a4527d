//! Periodic cooperative tasks, driven by tokio intervals and a shared stop
//! signal. Each tick does a bounded chunk of work and swallows its own
//! errors so one bad entity cannot stop the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use hive_core::types::now_ts;
use hive_core::HiveConfig;
use hive_gossip::local_state_hash;
use hive_settlement::{period_string, previous_period};
use hive_wire::message::{
    DidCredentialPresentPayload, FeeReportPayload, GossipPayload, HiveMessage, StateHashPayload,
};

use crate::dispatch::Dispatcher;

pub struct Ticker {
    pub dispatcher: Arc<Dispatcher>,
    pub config: HiveConfig,
    pub stop: watch::Receiver<bool>,
}

impl Ticker {
    /// Spawn all periodic tasks. Each observes the stop signal and exits
    /// promptly on shutdown.
    pub fn spawn_all(self) {
        let ticker = Arc::new(self);

        spawn_interval(Arc::clone(&ticker), Duration::from_secs(60), |t| async move {
            t.liveness_tick().await;
        });
        spawn_interval(Arc::clone(&ticker), Duration::from_secs(120), |t| async move {
            t.gossip_tick().await;
        });
        spawn_interval(Arc::clone(&ticker), Duration::from_secs(300), |t| async move {
            t.gc_tick().await;
        });
        spawn_interval(Arc::clone(&ticker), Duration::from_secs(600), |t| async move {
            t.reputation_tick().await;
        });
        spawn_interval(Arc::clone(&ticker), Duration::from_secs(600), |t| async move {
            t.settlement_tick().await;
        });
    }

    async fn liveness_tick(&self) {
        let d = &self.dispatcher;
        match d.members.liveness_sweep(now_ts()) {
            Ok(n) if n > 0 => debug!(deactivated = n, "liveness sweep"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "liveness sweep failed"),
        }
        let _ = d.intents.cleanup_expired(now_ts());
    }

    /// Broadcast our current counters, their fingerprint, and the fee report
    /// for the running period.
    async fn gossip_tick(&self) {
        let d = &self.dispatcher;
        if let Err(e) = d.engine.refresh_local_snapshot().await {
            warn!(error = %e, "local counter refresh failed");
        }
        let snapshot = match d.db.get_peer_state(&d.our_pubkey) {
            Ok(s) => s.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "gossip tick: snapshot unavailable");
                return;
            }
        };
        let now = now_ts();

        d.broadcast(HiveMessage::Gossip(GossipPayload {
            capacity_sats: snapshot.capacity_sats,
            forward_count: snapshot.forward_count,
            fees_earned_sats: snapshot.fees_earned_sats,
            rebalance_costs_sats: snapshot.rebalance_costs_sats,
            ts: now,
        }))
        .await;

        d.broadcast(HiveMessage::StateHash(StateHashPayload {
            state_hash: local_state_hash(&snapshot),
            ts: now,
        }))
        .await;

        d.broadcast(HiveMessage::FeeReport(FeeReportPayload {
            period: period_string(now),
            fees_earned_sats: snapshot.fees_earned_sats,
            forward_count: snapshot.forward_count,
            rebalance_costs_sats: snapshot.rebalance_costs_sats,
            ts: now,
        }))
        .await;
    }

    async fn gc_tick(&self) {
        let removed = self.dispatcher.dedup.gc(now_ts());
        if removed > 0 {
            debug!(removed, "dedup cache GC");
        }
    }

    /// Credential expiry, stale aggregation refresh, and re-gossip of our
    /// own active credentials.
    async fn reputation_tick(&self) {
        let d = &self.dispatcher;
        if let Err(e) = d.reputation.cleanup_expired() {
            warn!(error = %e, "credential expiry cleanup failed");
        }
        if let Err(e) = d.reputation.refresh_stale_aggregations() {
            warn!(error = %e, "stale aggregation refresh failed");
        }
        match d.reputation.credentials_for_relay() {
            Ok(credentials) => {
                for credential in credentials {
                    d.broadcast(HiveMessage::DidCredentialPresent(DidCredentialPresentPayload {
                        credential,
                    }))
                    .await;
                }
            }
            Err(e) => warn!(error = %e, "credential relay listing failed"),
        }
    }

    /// Drive the settlement protocol: propose the closed period, re-announce
    /// pending proposals, execute what we owe, and sweep for completion.
    async fn settlement_tick(&self) {
        if !self.config.settlement_enabled {
            return;
        }
        let d = &self.dispatcher;
        let period = previous_period(now_ts());

        match d.engine.propose(&period) {
            Ok(Some(proposal)) => {
                match d.engine.verify_and_vote(&proposal, true).await {
                    Ok(Some(vote)) => {
                        d.broadcast(HiveMessage::SettlementPropose(proposal)).await;
                        d.broadcast(HiveMessage::SettlementReady(vote)).await;
                    }
                    Ok(None) => {
                        d.broadcast(HiveMessage::SettlementPropose(proposal)).await;
                    }
                    Err(e) => warn!(error = %e, "proposer auto-vote failed"),
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "settlement proposal failed"),
        }

        match d.engine.rebroadcast_pending() {
            Ok(pending) => {
                for proposal in pending {
                    d.broadcast(HiveMessage::SettlementPropose(proposal)).await;
                }
            }
            Err(e) => warn!(error = %e, "pending rebroadcast failed"),
        }

        match d.engine.ready_proposals_owing() {
            Ok(owing) => {
                for proposal_id in owing {
                    // Long Lightning payments happen here, never on the
                    // inbound dispatch path.
                    match d.engine.execute_our_settlement(&proposal_id).await {
                        Ok(Some(execution)) => {
                            d.broadcast(HiveMessage::SettlementExecute(execution)).await;
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "settlement execution failed"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "execution sweep failed"),
        }
    }
}

fn spawn_interval<F, Fut>(ticker: Arc<Ticker>, period: Duration, tick: F)
where
    F: Fn(Arc<Ticker>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut stop = ticker.stop.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick(Arc::clone(&ticker)).await;
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
