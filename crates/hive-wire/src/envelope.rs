use serde::{Deserialize, Serialize};

use hive_core::constants::PROTOCOL_VERSION;
use hive_core::types::{MsgId, PeerId, Timestamp};
use hive_core::HiveError;

use crate::canonical::canonical_json;
use crate::message::HiveMessage;

/// Two-byte prefix marking the binary envelope form.
const BINARY_MAGIC: [u8; 2] = [0x48, 0x56]; // "HV"

/// Relay metadata carried beside the payload. Excluded from `msg_id` and
/// from every signature, so a message keeps its identity however many hops
/// it travels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMeta {
    pub msg_id: MsgId,
    pub ttl: u8,
    /// Pubkeys that have already carried this message.
    pub path: Vec<PeerId>,
    pub origin: PeerId,
    pub origin_ts: Timestamp,
}

/// The signed peer-to-peer message unit: `{type, version, payload, sender,
/// signature}` plus optional relay metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub sender: PeerId,
    /// zbase signature over `signing_payload()`.
    pub signature: String,
    pub message: HiveMessage,
    #[serde(default)]
    pub relay: Option<RelayMeta>,
}

impl Envelope {
    pub fn new(sender: PeerId, message: HiveMessage, signature: String) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sender,
            signature,
            message,
            relay: None,
        }
    }

    /// Content address of the carried message (relay metadata excluded).
    pub fn msg_id(&self) -> MsgId {
        MsgId::from_canonical(&self.message.canonical_payload())
    }

    /// The exact bytes the envelope signature covers: canonical JSON of
    /// `{payload, sender, version}` where `payload` is the tagged message
    /// object. Relay metadata and transport framing are never signed.
    pub fn signing_payload(&self) -> String {
        let obj = serde_json::json!({
            "payload": self.message.to_tagged_value(),
            "sender": self.sender.as_str(),
            "version": self.version,
        });
        canonical_json(&obj)
    }

    // ── Binary form ──────────────────────────────────────────────────────────

    /// Magic-prefixed frame around the canonical JSON body. Credential
    /// payloads embed free-form JSON, so the body stays self-describing; the
    /// prefix is what distinguishes framed transport bytes from bare JSON.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = BINARY_MAGIC.to_vec();
        out.extend(self.to_json().into_bytes());
        out
    }

    // ── JSON form ────────────────────────────────────────────────────────────

    pub fn to_json(&self) -> String {
        let obj = serde_json::json!({
            "type": self.message.kind().as_str(),
            "version": self.version,
            "payload": self.message.to_tagged_value(),
            "sender": self.sender.as_str(),
            "signature": self.signature,
            "relay": self.relay,
        });
        canonical_json(&obj)
    }

    pub fn from_json(json: &str) -> Result<Self, HiveError> {
        let v: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| HiveError::Serialization(format!("envelope json: {e}")))?;

        let version = v["version"]
            .as_u64()
            .ok_or_else(|| HiveError::Validation("envelope missing version".into()))?
            as u16;
        let sender = v["sender"]
            .as_str()
            .ok_or_else(|| HiveError::Validation("envelope missing sender".into()))
            .map(PeerId::new)?;
        let signature = v["signature"]
            .as_str()
            .ok_or_else(|| HiveError::Validation("envelope missing signature".into()))?
            .to_string();
        let message = HiveMessage::from_tagged_value(v["payload"].clone())
            .map_err(|e| HiveError::Validation(format!("envelope payload: {e}")))?;
        let relay = match v.get("relay") {
            Some(serde_json::Value::Null) | None => None,
            Some(r) => serde_json::from_value(r.clone())
                .map_err(|e| HiveError::Validation(format!("relay meta: {e}")))?,
        };

        Ok(Self { version, sender, signature, message, relay })
    }

    /// Decode either form: the 2-byte magic selects the framed form,
    /// anything else is parsed as bare JSON. Both normalize to the same
    /// in-process representation.
    pub fn decode(bytes: &[u8]) -> Result<Self, HiveError> {
        let body = if bytes.len() > 2 && bytes[..2] == BINARY_MAGIC {
            &bytes[2..]
        } else {
            bytes
        };
        let text = std::str::from_utf8(body)
            .map_err(|e| HiveError::Serialization(format!("envelope utf-8: {e}")))?;
        Self::from_json(text)
    }
}
