//! Inbound envelope dispatch.
//!
//! One consumer drains the inbound queue, so envelopes from the same sender
//! are handled in arrival order. Every envelope passes signature
//! verification and content-addressed dedup before its typed handler runs;
//! reliable kinds additionally consult the idempotency index. Handlers never
//! propagate errors to the transport; drops are logged and swallowed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use hive_core::types::{now_ts, PeerId};
use hive_core::HiveError;
use hive_gossip::{Deduplicator, IntentRegistry, MemberTable, Relay};
use hive_identity::IdentityAdapter;
use hive_mgmt::ManagementManager;
use hive_reputation::CredentialManager;
use hive_settlement::{period_string, SettlementEngine};
use hive_state::StateDb;
use hive_wire::message::{FeeReportPayload, HiveMessage};
use hive_wire::{reliable_event_id, Envelope};

pub struct Dispatcher {
    pub db: Arc<StateDb>,
    pub identity: Arc<dyn IdentityAdapter>,
    pub members: Arc<MemberTable>,
    pub dedup: Arc<Deduplicator>,
    pub relay: Arc<Relay>,
    pub reputation: Arc<CredentialManager>,
    pub mgmt: Arc<ManagementManager>,
    pub engine: Arc<SettlementEngine>,
    pub intents: Arc<IntentRegistry>,
    pub our_pubkey: PeerId,
    pub outbound_tx: mpsc::Sender<Envelope>,
}

impl Dispatcher {
    /// Process one inbound envelope end to end: dedup, verify, handle,
    /// relay.
    pub async fn handle_envelope(&self, envelope: Envelope) {
        if envelope.sender == self.our_pubkey {
            return;
        }

        let now = now_ts();
        let msg_id = envelope.msg_id();
        if !self.dedup.check_and_mark(&msg_id, now) {
            return;
        }

        // Fail-closed: unverifiable envelopes are dropped before any handler.
        if !self
            .identity
            .verify(&envelope.signing_payload(), &envelope.signature, &envelope.sender)
            .await
        {
            warn!(
                sender = %envelope.sender.short(),
                kind = envelope.message.kind().as_str(),
                "dropping envelope with bad signature"
            );
            return;
        }

        // Reliable kinds are acknowledged idempotently once accepted; the
        // index only records after a successful handler run, so an envelope
        // that arrived too early (e.g. a vote before its proposal) stays
        // eligible for redelivery.
        let event_id = reliable_event_id(&envelope.message);
        let kind = envelope.message.kind().as_str();
        if let Some(event_id) = &event_id {
            if self.db.event_recorded(kind, event_id) {
                debug!(kind, "duplicate reliable message acknowledged");
                self.relay_onward(&envelope);
                return;
            }
        }

        match self.run_handler(&envelope).await {
            Ok(()) => {
                if let Some(event_id) = &event_id {
                    if let Err(e) = self.db.check_and_record_event(kind, event_id) {
                        warn!(error = %e, "failed to record reliable event");
                    }
                }
            }
            Err(HiveError::Validation(msg)) => {
                warn!(sender = %envelope.sender.short(), kind, %msg, "dropped inbound message");
            }
            Err(HiveError::Signature(msg)) => {
                warn!(sender = %envelope.sender.short(), kind, %msg, "dropped unsigned or forged message");
            }
            Err(HiveError::Fatal(msg)) => {
                tracing::error!(kind, %msg, "handler aborted on invariant violation");
            }
            Err(other) => {
                warn!(kind, error = %other, "handler error");
            }
        }

        self.relay_onward(&envelope);
    }

    /// Epidemic relay after handling; dedup on the receiving side makes
    /// redundant deliveries harmless.
    fn relay_onward(&self, envelope: &Envelope) {
        if let Some(forwarded) = self.relay.prepare_for_relay(envelope) {
            let members = self.members.member_ids().unwrap_or_default();
            if !self
                .relay
                .recipients(envelope, &envelope.sender, &members)
                .is_empty()
                && self.outbound_tx.try_send(forwarded).is_err()
            {
                warn!("outbound queue full, dropping relay");
            }
        }
    }

    async fn run_handler(&self, envelope: &Envelope) -> Result<(), HiveError> {
        let sender = &envelope.sender;
        let now = now_ts();

        match &envelope.message {
            HiveMessage::Hello(payload) => self.members.handle_hello(sender, payload, now),

            HiveMessage::Gossip(payload) => self.members.handle_gossip(sender, payload, now),

            HiveMessage::StateHash(payload) => {
                let diverged = self.members.handle_state_hash(sender, payload, now)?;
                if diverged {
                    let request = HiveMessage::FeeReportRequest(
                        hive_wire::message::FeeReportRequestPayload {
                            period: period_string(now),
                        },
                    );
                    self.broadcast(request).await;
                }
                Ok(())
            }

            HiveMessage::FeeReport(payload) => self.members.handle_fee_report(sender, payload, now),

            HiveMessage::FeeReportRequest(payload) => {
                self.respond_with_fee_report(&payload.period).await
            }

            HiveMessage::Intent(payload) => {
                let ack = self.intents.handle_intent(sender, payload);
                self.broadcast(HiveMessage::IntentAck(ack)).await;
                Ok(())
            }

            HiveMessage::IntentAck(payload) => {
                debug!(
                    request_id = %payload.request_id,
                    conceded = payload.conceded,
                    "intent ack received"
                );
                Ok(())
            }

            HiveMessage::DidCredentialPresent(payload) => self
                .reputation
                .handle_present(sender, &payload.credential)
                .await
                .map(|_| ()),

            HiveMessage::DidCredentialRevoke(payload) => {
                self.reputation.handle_revoke(sender, payload).await.map(|_| ())
            }

            HiveMessage::MgmtCredentialPresent(payload) => self
                .mgmt
                .handle_present(sender, &payload.credential)
                .await
                .map(|_| ()),

            HiveMessage::MgmtCredentialRevoke(payload) => {
                self.mgmt.handle_revoke(sender, payload).await.map(|_| ())
            }

            HiveMessage::SettlementPropose(payload) => {
                if let Some(vote) = self.engine.handle_propose(sender, payload).await? {
                    self.broadcast(HiveMessage::SettlementReady(vote)).await;
                }
                Ok(())
            }

            HiveMessage::SettlementReady(payload) => {
                self.engine.handle_ready(sender, payload).await.map(|_| ())
            }

            HiveMessage::SettlementExecute(payload) => {
                self.engine.handle_execute(sender, payload).await.map(|_| ())
            }

            HiveMessage::PeerReputationSnapshot(payload) => {
                let mut report = payload.report.clone();
                if report.reporter_id != *sender {
                    return Err(HiveError::Validation(
                        "reputation snapshot reporter is not the sender".into(),
                    ));
                }
                if report.subject_id == report.reporter_id {
                    return Err(HiveError::Validation(
                        "self-reported reputation snapshot rejected".into(),
                    ));
                }
                report.reported_at = now;
                self.db.put_peer_reputation(&report)
            }
        }
    }

    /// Answer a fee-report request with our own counters for the period.
    async fn respond_with_fee_report(&self, period: &str) -> Result<(), HiveError> {
        let snapshot = self.db.get_peer_state(&self.our_pubkey)?.unwrap_or_default();
        let report = HiveMessage::FeeReport(FeeReportPayload {
            period: period.to_string(),
            fees_earned_sats: snapshot.fees_earned_sats,
            forward_count: snapshot.forward_count,
            rebalance_costs_sats: snapshot.rebalance_costs_sats,
            ts: now_ts(),
        });
        self.broadcast(report).await;
        Ok(())
    }

    /// Sign, stamp, and enqueue a message of our own. Overflow drops.
    pub async fn broadcast(&self, message: HiveMessage) {
        let mut envelope = Envelope::new(self.our_pubkey.clone(), message, String::new());
        let signature = self.identity.sign(&envelope.signing_payload()).await;
        if signature.is_empty() {
            warn!("signing unavailable, dropping outbound message");
            return;
        }
        envelope.signature = signature;
        let stamped = self.relay.prepare_for_broadcast(envelope);
        if self.outbound_tx.try_send(stamped).is_err() {
            warn!("outbound queue full, dropping broadcast");
        }
    }
}
