//! hive-wire — typed hive protocol messages, the signed envelope, and the
//! canonicalization rules every node must agree on byte-for-byte.
//!
//! Three contracts live here:
//!   1. The message enum and envelope (binary and JSON forms, 1-to-1).
//!   2. `msg_id`: content address over the canonical payload with relay
//!      metadata stripped, so identity survives relaying.
//!   3. Signing payload builders: the exact bytes each signature covers.

pub mod canonical;
pub mod envelope;
pub mod message;
pub mod reliable;
pub mod signing;

pub use canonical::canonical_json;
pub use envelope::{Envelope, RelayMeta};
pub use message::{HiveMessage, MessageKind};
pub use reliable::reliable_event_id;
pub use signing::{
    did_credential_signing_payload, did_revoke_signing_payload, mgmt_credential_signing_payload,
    mgmt_revoke_signing_payload, receipt_signing_payload, settlement_executed_signing_payload,
    settlement_ready_signing_payload,
};
