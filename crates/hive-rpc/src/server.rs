use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use hive_core::credential::Outcome;
use hive_core::intent::IntentKind;
use hive_core::mgmt::PermissionTier;
use hive_core::types::{now_ts, PeerId};
use hive_core::{HiveConfig, HiveError};
use hive_gossip::{IntentRegistry, Relay};
use hive_identity::IdentityAdapter;
use hive_mgmt::ManagementManager;
use hive_reputation::CredentialManager;
use hive_lightning::channel_open::{check_feerate_gate, open_channel};
use hive_lightning::LightningRpc;
use hive_settlement::{previous_period, SettlementEngine};
use hive_state::StateDb;
use hive_wire::message::{
    DidCredentialPresentPayload, DidCredentialRevokePayload, HiveMessage,
    MgmtCredentialRevokePayload,
};
use hive_wire::Envelope;

use crate::api::HiveApiServer;
use crate::types::{
    RpcAck, RpcChannelOpen, RpcCredential, RpcIntent, RpcMgmtCredential, RpcProposal,
    RpcReputation, RpcSchema, RpcSchemaAction, RpcSettledPeriod, RpcStatus, RpcValidation,
};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

fn map_err(e: HiveError) -> ErrorObject<'static> {
    match e {
        HiveError::Validation(_) | HiveError::Capacity { .. } => rpc_err(-32602, e.to_string()),
        HiveError::Authorization(_) | HiveError::Signature(_) => rpc_err(-32001, e.to_string()),
        HiveError::Unavailable(_) => rpc_err(-32002, e.to_string()),
        _ => rpc_err(-32603, e.to_string()),
    }
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub db: Arc<StateDb>,
    pub config: HiveConfig,
    pub our_pubkey: PeerId,
    pub identity: Arc<dyn IdentityAdapter>,
    pub engine: Arc<SettlementEngine>,
    pub reputation: Arc<CredentialManager>,
    pub mgmt: Arc<ManagementManager>,
    pub intents: Arc<IntentRegistry>,
    pub relay: Arc<Relay>,
    pub lightning: Arc<dyn LightningRpc>,
    /// Outbound transport queue; publish is non-blocking with overflow drop.
    pub outbound_tx: mpsc::Sender<Envelope>,
    /// Inbound dispatch feed for injected packets (external transport only).
    pub inbound_tx: Option<mpsc::Sender<Envelope>>,
}

impl RpcServerState {
    /// Sign a message under our identity, stamp relay metadata, and enqueue
    /// it for broadcast. Queue overflow drops; producers tolerate drop.
    pub async fn broadcast(&self, message: HiveMessage) -> Result<(), HiveError> {
        let mut envelope = Envelope::new(self.our_pubkey.clone(), message, String::new());
        let signature = self.identity.sign(&envelope.signing_payload()).await;
        if signature.is_empty() {
            return Err(HiveError::Unavailable("signing unavailable for broadcast".into()));
        }
        envelope.signature = signature;
        let stamped = self.relay.prepare_for_broadcast(envelope);
        if let Err(e) = self.outbound_tx.try_send(stamped) {
            warn!(error = %e, "outbound queue full, dropping broadcast");
        }
        Ok(())
    }
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

fn parse_outcome(s: &str) -> Result<Outcome, ErrorObject<'static>> {
    match s {
        "renew" => Ok(Outcome::Renew),
        "revoke" => Ok(Outcome::Revoke),
        "neutral" => Ok(Outcome::Neutral),
        other => Err(rpc_err(-32602, format!("invalid outcome: {other}"))),
    }
}

// ── RPC implementation ───────────────────────────────────────────────────────

#[async_trait]
impl HiveApiServer for RpcServer {
    async fn register_offer(&self, peer_id: String, bolt12_offer: String) -> RpcResult<RpcAck> {
        self.state
            .engine
            .register_offer(PeerId::new(peer_id), &bolt12_offer)
            .map_err(map_err)?;
        Ok(RpcAck::ok())
    }

    async fn propose_settlement(&self, period: Option<String>) -> RpcResult<Option<RpcProposal>> {
        let period = period.unwrap_or_else(|| previous_period(now_ts()));
        let Some(payload) = self.state.engine.propose(&period).map_err(map_err)? else {
            return Ok(None);
        };

        // Proposer auto-vote, then broadcast both.
        let vote = self
            .state
            .engine
            .verify_and_vote(&payload, true)
            .await
            .map_err(map_err)?;

        let proposal = RpcProposal {
            proposal_id: payload.proposal_id.clone(),
            period: payload.period.clone(),
            data_hash: payload.data_hash.clone(),
            plan_hash: payload.plan_hash.clone(),
            total_fees_sats: payload.total_fees_sats,
            member_count: payload.member_count,
            status: "pending".into(),
        };

        self.state
            .broadcast(HiveMessage::SettlementPropose(payload))
            .await
            .map_err(map_err)?;
        if let Some(vote) = vote {
            self.state
                .broadcast(HiveMessage::SettlementReady(vote))
                .await
                .map_err(map_err)?;
        }

        Ok(Some(proposal))
    }

    async fn settlement_status(&self) -> RpcResult<Value> {
        self.state.engine.status().map_err(map_err)
    }

    async fn settlement_history(&self, limit: u32) -> RpcResult<Vec<RpcSettledPeriod>> {
        let limit = limit.min(200) as usize;
        let settled = self.state.db.get_settled_periods(limit).map_err(map_err)?;
        Ok(settled
            .into_iter()
            .map(|s| RpcSettledPeriod {
                period: s.period,
                proposal_id: s.proposal_id,
                total_distributed_sats: s.total_distributed_sats,
                settled_at: s.settled_at,
            })
            .collect())
    }

    async fn issue_credential(
        &self,
        subject_id: String,
        domain: String,
        metrics: Value,
        outcome: String,
        evidence: Option<Vec<Value>>,
    ) -> RpcResult<RpcCredential> {
        let Value::Object(metrics) = metrics else {
            return Err(rpc_err(-32602, "metrics must be a JSON object"));
        };
        let outcome = parse_outcome(&outcome)?;

        let credential = self
            .state
            .reputation
            .issue_credential(
                PeerId::new(subject_id),
                &domain,
                metrics,
                outcome,
                evidence.unwrap_or_default(),
                None,
                None,
                None,
            )
            .await
            .map_err(map_err)?;

        let rpc_view = RpcCredential {
            credential_id: credential.credential_id.clone(),
            issuer_id: credential.issuer_id.to_string(),
            subject_id: credential.subject_id.to_string(),
            domain: credential.domain.clone(),
            outcome: credential.outcome.as_str().into(),
            issued_at: credential.issued_at,
        };

        self.state
            .broadcast(HiveMessage::DidCredentialPresent(DidCredentialPresentPayload {
                credential,
            }))
            .await
            .map_err(map_err)?;

        Ok(rpc_view)
    }

    async fn revoke_credential(&self, credential_id: String, reason: String) -> RpcResult<RpcAck> {
        let payload: DidCredentialRevokePayload = self
            .state
            .reputation
            .revoke_credential(&credential_id, &reason)
            .await
            .map_err(map_err)?;
        self.state
            .broadcast(HiveMessage::DidCredentialRevoke(payload))
            .await
            .map_err(map_err)?;
        Ok(RpcAck::ok())
    }

    async fn reputation(
        &self,
        subject_id: String,
        domain: Option<String>,
    ) -> RpcResult<Option<RpcReputation>> {
        let agg = self
            .state
            .reputation
            .aggregate_reputation(&PeerId::new(subject_id), domain.as_deref())
            .map_err(map_err)?;
        Ok(agg.map(|a| RpcReputation {
            subject_id: a.subject_id.to_string(),
            domain: a.domain,
            score: a.score,
            tier: a.tier.as_str().into(),
            confidence: format!("{:?}", a.confidence).to_lowercase(),
            credential_count: a.credential_count,
            issuer_count: a.issuer_count,
            components: Value::Object(a.components),
        }))
    }

    async fn list_schemas(&self) -> RpcResult<Vec<RpcSchema>> {
        Ok(hive_mgmt::list_schemas()
            .into_iter()
            .map(|category| RpcSchema {
                schema_id: category.schema_id.into(),
                name: category.name.into(),
                description: category.description.into(),
                danger_range: category.danger_range,
                actions: category
                    .actions
                    .iter()
                    .map(|(name, action)| RpcSchemaAction {
                        action: (*name).into(),
                        description: action.description.into(),
                        danger_total: action.danger.total(),
                        required_tier: action.required_tier.as_str().into(),
                        parameters: json!(action
                            .parameters
                            .iter()
                            .map(|(p, t)| (p.to_string(), t.name()))
                            .collect::<std::collections::BTreeMap<_, _>>()),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn validate_action(
        &self,
        schema_id: String,
        action: String,
        params: Option<Value>,
        reputation_tier: Option<String>,
    ) -> RpcResult<RpcValidation> {
        match hive_mgmt::validate_command(&schema_id, &action, params.as_ref()) {
            Ok(schema_action) => {
                let tier = reputation_tier
                    .as_deref()
                    .and_then(|t| match t {
                        "newcomer" => Some(hive_core::credential::ReputationTier::Newcomer),
                        "recognized" => Some(hive_core::credential::ReputationTier::Recognized),
                        "trusted" => Some(hive_core::credential::ReputationTier::Trusted),
                        "senior" => Some(hive_core::credential::ReputationTier::Senior),
                        _ => None,
                    })
                    .unwrap_or(hive_core::credential::ReputationTier::Newcomer);
                Ok(RpcValidation {
                    valid: true,
                    reason: None,
                    danger_total: Some(schema_action.danger.total()),
                    required_tier: Some(schema_action.required_tier.as_str().into()),
                    price_sats: Some(hive_mgmt::price_for(&schema_action.danger, tier)),
                })
            }
            Err(reason) => Ok(RpcValidation {
                valid: false,
                reason: Some(reason),
                danger_total: None,
                required_tier: None,
                price_sats: None,
            }),
        }
    }

    async fn issue_management_credential(
        &self,
        agent_id: String,
        node_id: String,
        tier: String,
        allowed_schemas: Vec<String>,
        constraints: Option<Value>,
        valid_days: Option<i64>,
    ) -> RpcResult<RpcMgmtCredential> {
        let tier = PermissionTier::parse(&tier)
            .ok_or_else(|| rpc_err(-32602, format!("invalid tier: {tier}")))?;
        let credential = self
            .state
            .mgmt
            .issue_credential(
                PeerId::new(agent_id),
                PeerId::new(node_id),
                tier,
                allowed_schemas,
                constraints.unwrap_or_else(|| json!({})),
                valid_days.unwrap_or(90),
            )
            .await
            .map_err(map_err)?;
        Ok(mgmt_to_rpc(&credential))
    }

    async fn revoke_management_credential(
        &self,
        credential_id: String,
        reason: String,
    ) -> RpcResult<RpcAck> {
        let payload: MgmtCredentialRevokePayload = self
            .state
            .mgmt
            .revoke_credential(&credential_id, &reason)
            .await
            .map_err(map_err)?;
        self.state
            .broadcast(HiveMessage::MgmtCredentialRevoke(payload))
            .await
            .map_err(map_err)?;
        Ok(RpcAck::ok())
    }

    async fn list_management_credentials(
        &self,
        agent_id: Option<String>,
        node_id: Option<String>,
    ) -> RpcResult<Vec<RpcMgmtCredential>> {
        let agent = agent_id.map(PeerId::new);
        let node = node_id.map(PeerId::new);
        let credentials = self
            .state
            .mgmt
            .list_credentials(agent.as_ref(), node.as_ref())
            .map_err(map_err)?;
        Ok(credentials.iter().map(mgmt_to_rpc).collect())
    }

    async fn open_channel_intent(&self, target: String, deadline_secs: i64) -> RpcResult<RpcIntent> {
        let deadline = now_ts() + deadline_secs.max(1);
        let Some(payload) = self.state.intents.claim(IntentKind::ChannelOpen, &target, deadline)
        else {
            return Ok(RpcIntent { granted: false, request_id: None });
        };
        let request_id = payload.request_id.clone();
        self.state
            .broadcast(HiveMessage::Intent(payload))
            .await
            .map_err(map_err)?;
        Ok(RpcIntent { granted: true, request_id: Some(request_id) })
    }

    async fn open_channel(
        &self,
        peer_id: String,
        amount_sats: u64,
        feerate: Option<String>,
        announce: Option<bool>,
    ) -> RpcResult<RpcChannelOpen> {
        let target = PeerId::new(peer_id);

        // Coordination first: nobody opens toward a target another member
        // has a live claim on.
        if !self.state.intents.we_hold(IntentKind::ChannelOpen, target.as_str()) {
            let deadline = now_ts() + 600;
            match self.state.intents.claim(IntentKind::ChannelOpen, target.as_str(), deadline) {
                Some(payload) => {
                    self.state
                        .broadcast(HiveMessage::Intent(payload))
                        .await
                        .map_err(map_err)?;
                }
                None => {
                    return Err(rpc_err(
                        -32001,
                        "another member holds the channel-open intent for this target",
                    ));
                }
            }
        }

        check_feerate_gate(
            self.state.lightning.as_ref(),
            self.state.config.feerate_gate_threshold_sat_per_vb,
        )
        .await
        .map_err(map_err)?;

        let outcome = open_channel(
            self.state.lightning.as_ref(),
            &target,
            amount_sats,
            feerate.as_deref(),
            announce.unwrap_or(true),
        )
        .await
        .map_err(map_err)?;

        Ok(RpcChannelOpen {
            funding_type: outcome.funding_type.as_str().into(),
            channel_id: outcome.channel_id,
            txid: outcome.txid,
        })
    }

    async fn report_peer_reputation(
        &self,
        subject_id: String,
        htlc_success_rate: f64,
        avg_response_ms: u32,
        centrality: f64,
        warnings: Option<Vec<String>>,
    ) -> RpcResult<RpcAck> {
        let subject = PeerId::new(subject_id);
        if subject == self.state.our_pubkey {
            return Err(rpc_err(-32602, "cannot report reputation about ourselves"));
        }
        if !(0.0..=1.0).contains(&htlc_success_rate) || !(0.0..=1.0).contains(&centrality) {
            return Err(rpc_err(-32602, "rates must be in [0, 1]"));
        }
        let report = hive_core::member::PeerReputationReport {
            reporter_id: self.state.our_pubkey.clone(),
            subject_id: subject,
            htlc_success_rate,
            avg_response_ms,
            centrality,
            warnings: warnings.unwrap_or_default(),
            reported_at: now_ts(),
        };
        self.state.db.put_peer_reputation(&report).map_err(map_err)?;
        self.state
            .broadcast(HiveMessage::PeerReputationSnapshot(
                hive_wire::message::PeerReputationSnapshotPayload { report },
            ))
            .await
            .map_err(map_err)?;
        Ok(RpcAck::ok())
    }

    async fn inject_peer_packet(&self, packet: Value) -> RpcResult<RpcAck> {
        let Some(inbound) = &self.state.inbound_tx else {
            return Err(rpc_err(-32002, "packet injection requires the external transport adapter"));
        };
        let text = serde_json::to_string(&packet).map_err(|e| rpc_err(-32602, e.to_string()))?;
        let envelope = Envelope::from_json(&text).map_err(map_err)?;
        inbound
            .try_send(envelope)
            .map_err(|_| rpc_err(-32002, "inbound queue full"))?;
        Ok(RpcAck::ok())
    }

    async fn get_status(&self) -> RpcResult<RpcStatus> {
        let settlement = self.state.engine.status().map_err(map_err)?;
        Ok(RpcStatus {
            our_pubkey: self.state.our_pubkey.to_string(),
            member_count: self.state.db.count_members(),
            identity: self.state.identity.info().await,
            settlement,
            governance_mode: format!("{:?}", self.state.config.governance_mode).to_lowercase(),
        })
    }
}

fn mgmt_to_rpc(credential: &hive_core::mgmt::ManagementCredential) -> RpcMgmtCredential {
    RpcMgmtCredential {
        credential_id: credential.credential_id.clone(),
        issuer_id: credential.issuer_id.to_string(),
        agent_id: credential.agent_id.to_string(),
        node_id: credential.node_id.to_string(),
        tier: credential.tier.as_str().into(),
        allowed_schemas: credential.allowed_schemas.clone(),
        valid_from: credential.valid_from,
        valid_until: credential.valid_until,
        revoked: credential.revoked_at.is_some(),
    }
}
