//! Two-node protocol integration test.
//!
//! Wires two dispatchers together in-process (no libp2p, no Lightning node)
//! and drives a full settlement round through the same code paths the
//! transport would: signed envelopes in, signed broadcasts out.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use hive_core::intent::IntentKind;
use hive_core::member::{FeeReport, MemberRecord, PeerStateSnapshot};
use hive_core::settlement::ProposalStatus;
use hive_core::types::{now_ts, PeerId, Sats};
use hive_core::HiveError;
use hive_gossip::{Deduplicator, IntentRegistry, MemberTable, Relay};
use hive_identity::IdentityAdapter;
use hive_lightning::rpc::*;
use hive_mgmt::ManagementManager;
use hive_node::dispatch::Dispatcher;
use hive_reputation::CredentialManager;
use hive_settlement::SettlementEngine;
use hive_state::StateDb;
use hive_wire::message::{HelloPayload, HiveMessage, IntentPayload};
use hive_wire::Envelope;

// ── Fakes ─────────────────────────────────────────────────────────────────────

fn digest(message: &str) -> u64 {
    let mut h = DefaultHasher::new();
    message.hash(&mut h);
    h.finish()
}

fn fake_sig(node: &PeerId, message: &str) -> String {
    format!("zb:{}:{}", node.as_str(), digest(message))
}

struct FakeIdentity {
    node: PeerId,
}

#[async_trait]
impl IdentityAdapter for FakeIdentity {
    async fn sign(&self, message: &str) -> String {
        fake_sig(&self.node, message)
    }
    async fn verify(&self, message: &str, zbase: &str, claimed: &PeerId) -> bool {
        zbase == fake_sig(claimed, message)
    }
    async fn info(&self) -> serde_json::Value {
        serde_json::json!({"mode": "local"})
    }
}

#[derive(Default)]
struct FakeLightning;

#[async_trait]
impl LightningRpc for FakeLightning {
    async fn signmessage(&self, _m: &str) -> Result<SignMessage, HiveError> {
        unimplemented!()
    }
    async fn checkmessage(
        &self,
        _m: &str,
        _z: &str,
        _p: Option<&PeerId>,
    ) -> Result<CheckMessage, HiveError> {
        unimplemented!()
    }
    async fn getinfo(&self) -> Result<NodeInfo, HiveError> {
        unimplemented!()
    }
    async fn pay(&self, bolt11: &str) -> Result<PayResult, HiveError> {
        Ok(PayResult {
            status: "complete".into(),
            payment_hash: Some(format!("ph:{bolt11}")),
            amount_sent_msat: None,
        })
    }
    async fn fetchinvoice(&self, offer: &str, amount_msat: u64) -> Result<FetchInvoice, HiveError> {
        Ok(FetchInvoice { invoice: format!("lni1:{offer}:{amount_msat}") })
    }
    async fn offer(&self, _a: &str, _d: &str) -> Result<OfferResult, HiveError> {
        Ok(OfferResult { bolt12: "lno1selfoffer".into(), offer_id: None })
    }
    async fn listforwards(&self, _s: Option<&str>) -> Result<Vec<Forward>, HiveError> {
        Ok(vec![])
    }
    async fn estimated_feerate_sat_per_vb(&self) -> Result<u64, HiveError> {
        Ok(10)
    }
    async fn fundpsbt(&self, _a: Sats, _f: Option<&str>) -> Result<PsbtFunding, HiveError> {
        unimplemented!()
    }
    async fn openchannel_init(
        &self,
        _p: &PeerId,
        _a: Sats,
        _psbt: &str,
        _f: Option<&str>,
        _an: bool,
    ) -> Result<OpenChannelInit, HiveError> {
        unimplemented!()
    }
    async fn openchannel_update(&self, _c: &str, _p: &str) -> Result<OpenChannelUpdate, HiveError> {
        unimplemented!()
    }
    async fn openchannel_signed(&self, _c: &str, _s: &str) -> Result<ChannelFunding, HiveError> {
        unimplemented!()
    }
    async fn openchannel_abort(&self, _c: &str) -> Result<(), HiveError> {
        unimplemented!()
    }
    async fn signpsbt(&self, _p: &str) -> Result<SignedPsbt, HiveError> {
        unimplemented!()
    }
    async fn unreserveinputs(&self, _p: &str) -> Result<(), HiveError> {
        unimplemented!()
    }
    async fn fundchannel(
        &self,
        _p: &PeerId,
        _a: Sats,
        _f: Option<&str>,
        _an: bool,
    ) -> Result<ChannelFunding, HiveError> {
        unimplemented!()
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

fn pk(n: u8) -> PeerId {
    PeerId::new(format!("02{}", format!("{n:02x}").repeat(32)))
}

struct TestNode {
    _dir: tempfile::TempDir,
    dispatcher: Arc<Dispatcher>,
    outbound_rx: mpsc::Receiver<Envelope>,
}

impl TestNode {
    fn new(n: u8) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(StateDb::open(dir.path()).unwrap());
        let pubkey = pk(n);
        let identity: Arc<dyn IdentityAdapter> = Arc::new(FakeIdentity { node: pubkey.clone() });
        let lightning: Arc<dyn LightningRpc> = Arc::new(FakeLightning);
        let reputation = Arc::new(CredentialManager::new(
            Arc::clone(&db),
            Arc::clone(&identity),
            pubkey.clone(),
        ));
        let (outbound_tx, outbound_rx) = mpsc::channel(64);

        let dispatcher = Arc::new(Dispatcher {
            db: Arc::clone(&db),
            identity: Arc::clone(&identity),
            members: Arc::new(MemberTable::new(Arc::clone(&db), pubkey.clone())),
            dedup: Arc::new(Deduplicator::new()),
            relay: Arc::new(Relay::new(pubkey.clone(), 2)),
            reputation: Arc::clone(&reputation),
            mgmt: Arc::new(ManagementManager::new(
                Arc::clone(&db),
                Arc::clone(&identity),
                pubkey.clone(),
            )),
            engine: Arc::new(SettlementEngine::new(
                Arc::clone(&db),
                Arc::clone(&identity),
                lightning,
                reputation,
                pubkey.clone(),
            )),
            intents: Arc::new(IntentRegistry::new(pubkey.clone())),
            our_pubkey: pubkey.clone(),
            outbound_tx,
        });

        Self { _dir: dir, dispatcher, outbound_rx }
    }

    /// Seed a member with capacity and a fee report for `period`.
    fn seed_member(&self, peer: &PeerId, period: &str, fees: Sats, forwards: u64) {
        let now = now_ts();
        self.dispatcher.db.put_member(&MemberRecord::new(peer.clone(), now)).unwrap();
        self.dispatcher
            .db
            .put_peer_state(
                peer,
                &PeerStateSnapshot {
                    peer_id: Some(peer.clone()),
                    capacity_sats: 1_000_000,
                    forward_count: forwards,
                    fees_earned_sats: fees,
                    rebalance_costs_sats: 0,
                    last_snapshot_ts: now,
                },
            )
            .unwrap();
        self.dispatcher
            .db
            .put_fee_report(&FeeReport {
                peer_id: peer.clone(),
                period: period.into(),
                fees_earned_sats: fees,
                forward_count: forwards,
                rebalance_costs_sats: 0,
                reported_at: now,
            })
            .unwrap();
    }

    fn drain_outbound(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = self.outbound_rx.try_recv() {
            out.push(envelope);
        }
        out
    }
}

/// Sign a message the way the node would and wrap it in an envelope.
fn signed_envelope(sender: &PeerId, message: HiveMessage) -> Envelope {
    let mut envelope = Envelope::new(sender.clone(), message, String::new());
    envelope.signature = fake_sig(sender, &envelope.signing_payload());
    envelope
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn hello_establishes_membership() {
    let mut node = TestNode::new(1);
    let hello = HiveMessage::Hello(HelloPayload { capacity_sats: 500_000, forward_count: 2, ts: 1 });
    node.dispatcher.handle_envelope(signed_envelope(&pk(2), hello)).await;
    assert!(node.dispatcher.members.is_member(&pk(2)));
    node.drain_outbound();
}

#[tokio::test]
async fn forged_signature_is_dropped_before_handling() {
    let node = TestNode::new(1);
    let hello = HiveMessage::Hello(HelloPayload { capacity_sats: 500_000, forward_count: 2, ts: 1 });
    let mut forged = Envelope::new(pk(2), hello, String::new());
    forged.signature = "zb:forged:0".into();
    node.dispatcher.handle_envelope(forged).await;
    assert!(!node.dispatcher.members.is_member(&pk(2)));
}

#[tokio::test]
async fn duplicate_envelope_dispatches_once() {
    let mut node = TestNode::new(1);
    let intent = HiveMessage::Intent(IntentPayload {
        request_id: "r1".into(),
        kind: IntentKind::ChannelOpen,
        target: "02target".into(),
        deadline: now_ts() + 600,
        ts: 5,
    });
    let envelope = signed_envelope(&pk(2), intent);

    node.dispatcher.handle_envelope(envelope.clone()).await;
    node.dispatcher.handle_envelope(envelope).await;

    let acks: Vec<_> = node
        .drain_outbound()
        .into_iter()
        .filter(|e| matches!(e.message, HiveMessage::IntentAck(_)))
        .collect();
    assert_eq!(acks.len(), 1, "the handler runs exactly once per msg_id");
}

#[tokio::test]
async fn settlement_round_reaches_ready_on_both_nodes() {
    let period = "2026-10";
    let mut a = TestNode::new(1);
    let mut b = TestNode::new(2);

    for node in [&a, &b] {
        node.seed_member(&pk(1), period, 1000, 30);
        node.seed_member(&pk(2), period, 0, 0);
    }

    // A proposes and auto-votes.
    let proposal = a.dispatcher.engine.propose(period).unwrap().unwrap();
    let a_vote = a.dispatcher.engine.verify_and_vote(&proposal, true).await.unwrap().unwrap();

    // B receives the proposal over the wire and answers with its own vote.
    let propose_env = signed_envelope(&pk(1), HiveMessage::SettlementPropose(proposal.clone()));
    b.dispatcher.handle_envelope(propose_env).await;
    let b_broadcasts = b.drain_outbound();
    let b_vote_env = b_broadcasts
        .iter()
        .find(|e| matches!(e.message, HiveMessage::SettlementReady(_)))
        .expect("B votes after independent verification")
        .clone();

    // Cross-deliver the votes. Quorum for two members is 2.
    a.dispatcher.handle_envelope(b_vote_env).await;
    let a_vote_env = signed_envelope(&pk(1), HiveMessage::SettlementReady(a_vote));
    b.dispatcher.handle_envelope(a_vote_env).await;

    for node in [&a, &b] {
        let stored = node
            .dispatcher
            .db
            .get_settlement_proposal(&proposal.proposal_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ProposalStatus::Ready);
    }
    a.drain_outbound();
}

#[tokio::test]
async fn tampered_proposal_gets_no_vote() {
    let period = "2026-10";
    let mut b = TestNode::new(2);
    b.seed_member(&pk(1), period, 1000, 30);
    b.seed_member(&pk(2), period, 0, 0);

    let a = TestNode::new(1);
    for (peer, fees, forwards) in [(pk(1), 1000u64, 30u64), (pk(2), 0, 0)] {
        a.seed_member(&peer, period, fees, forwards);
    }
    let mut proposal = a.dispatcher.engine.propose(period).unwrap().unwrap();
    // Proposer inflates its own fees and re-hashes the tampered snapshot;
    // B's honest data no longer matches.
    proposal.contributions[0].fees_earned = 9999;
    proposal.total_fees_sats = 9999;
    let tampered = hive_settlement::compute_settlement_plan(period, &proposal.contributions);
    proposal.data_hash = tampered.data_hash;
    proposal.plan_hash = tampered.plan_hash;

    let env = signed_envelope(&pk(1), HiveMessage::SettlementPropose(proposal));
    b.dispatcher.handle_envelope(env).await;
    let votes: Vec<_> = b
        .drain_outbound()
        .into_iter()
        .filter(|e| matches!(e.message, HiveMessage::SettlementReady(_)))
        .collect();
    assert!(votes.is_empty(), "hash mismatch must not produce a vote");
}

#[tokio::test]
async fn relay_forwards_with_decremented_ttl() {
    let mut node = TestNode::new(1);
    // A third member exists, so the relay has someone to forward to.
    node.seed_member(&pk(3), "2026-10", 0, 0);

    let hello = HiveMessage::Hello(HelloPayload { capacity_sats: 1, forward_count: 0, ts: 9 });
    let mut envelope = signed_envelope(&pk(2), hello);
    envelope.relay = Some(hive_wire::RelayMeta {
        msg_id: envelope.msg_id(),
        ttl: 2,
        path: vec![pk(2)],
        origin: pk(2),
        origin_ts: 9,
    });

    node.dispatcher.handle_envelope(envelope).await;
    let forwarded: Vec<_> = node
        .drain_outbound()
        .into_iter()
        .filter(|e| matches!(e.message, HiveMessage::Hello(_)))
        .collect();
    assert_eq!(forwarded.len(), 1);
    let meta = forwarded[0].relay.as_ref().unwrap();
    assert_eq!(meta.ttl, 1);
    assert!(meta.path.contains(&pk(1)));
}
