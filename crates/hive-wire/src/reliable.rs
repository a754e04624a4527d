use crate::message::HiveMessage;

/// Deterministic `(kind, event_id)` key for the idempotency index.
///
/// Reliable kinds (credentials, revocations, settlement protocol messages)
/// return the content-identifying fields of the message; gossip-class kinds
/// return None and are deduplicated by `msg_id` alone.
pub fn reliable_event_id(message: &HiveMessage) -> Option<String> {
    match message {
        HiveMessage::DidCredentialPresent(p) => Some(p.credential.credential_id.clone()),
        HiveMessage::DidCredentialRevoke(p) => Some(format!("revoke:{}", p.credential_id)),
        HiveMessage::MgmtCredentialPresent(p) => Some(p.credential.credential_id.clone()),
        HiveMessage::MgmtCredentialRevoke(p) => Some(format!("revoke:{}", p.credential_id)),
        HiveMessage::SettlementPropose(p) => Some(p.proposal_id.clone()),
        HiveMessage::SettlementReady(p) => {
            Some(format!("{}:{}", p.proposal_id, p.voter_peer_id.as_str()))
        }
        HiveMessage::SettlementExecute(p) => {
            Some(format!("{}:{}", p.proposal_id, p.executor_peer_id.as_str()))
        }
        _ => None,
    }
}
