//! Dual-funded (v2) channel open with single-funded fallback.
//!
//! The v2 path is `fundpsbt → openchannel_init → openchannel_update* →
//! signpsbt → openchannel_signed`. On any failure of init/update/signpsbt,
//! or when the update negotiation never secures commitments within the round
//! limit, the attempt is unwound (`openchannel_abort` only if an init
//! succeeded, `unreserveinputs` whenever a PSBT exists) and the open falls
//! through to single-funded `fundchannel`. `feerate` and `announce` are
//! forwarded identically into both paths.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hive_core::{HiveError, PeerId, Sats};

use crate::rpc::LightningRpc;

/// Update-round cap for the v2 interactive negotiation.
pub const MAX_V2_UPDATE_ROUNDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingType {
    #[serde(rename = "dual-funded")]
    DualFunded,
    #[serde(rename = "single-funded")]
    SingleFunded,
}

impl FundingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingType::DualFunded => "dual-funded",
            FundingType::SingleFunded => "single-funded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOpenOutcome {
    pub funding_type: FundingType,
    pub channel_id: String,
    pub txid: String,
}

/// Refuse channel opens while the chain feerate exceeds the configured gate.
pub async fn check_feerate_gate(
    rpc: &dyn LightningRpc,
    threshold_sat_per_vb: u64,
) -> Result<(), HiveError> {
    let estimate = rpc.estimated_feerate_sat_per_vb().await?;
    if estimate > threshold_sat_per_vb {
        return Err(HiveError::Validation(format!(
            "feerate gate: {estimate} sat/vB exceeds threshold {threshold_sat_per_vb}"
        )));
    }
    Ok(())
}

pub async fn open_channel(
    rpc: &dyn LightningRpc,
    peer: &PeerId,
    amount_sats: Sats,
    feerate: Option<&str>,
    announce: bool,
) -> Result<ChannelOpenOutcome, HiveError> {
    match try_dual_funded(rpc, peer, amount_sats, feerate, announce).await {
        Ok(funding) => Ok(ChannelOpenOutcome {
            funding_type: FundingType::DualFunded,
            channel_id: funding.0,
            txid: funding.1,
        }),
        Err(V2Abort::Unwound(reason)) => {
            info!(peer = %peer.short(), %reason, "v2 open aborted, falling back to fundchannel");
            let funding = rpc.fundchannel(peer, amount_sats, feerate, announce).await?;
            Ok(ChannelOpenOutcome {
                funding_type: FundingType::SingleFunded,
                channel_id: funding.channel_id,
                txid: funding.txid,
            })
        }
        Err(V2Abort::Fatal(e)) => Err(e),
    }
}

enum V2Abort {
    /// v2 attempt cleaned up; single-funded fallback may proceed.
    Unwound(String),
    /// Funds may already be committed; do not retry through the v1 path.
    Fatal(HiveError),
}

async fn try_dual_funded(
    rpc: &dyn LightningRpc,
    peer: &PeerId,
    amount_sats: Sats,
    feerate: Option<&str>,
    announce: bool,
) -> Result<(String, String), V2Abort> {
    let funding = match rpc.fundpsbt(amount_sats, feerate).await {
        Ok(f) => f,
        // No PSBT was reserved: nothing to unwind.
        Err(e) => return Err(V2Abort::Unwound(format!("fundpsbt: {e}"))),
    };

    let init = match rpc
        .openchannel_init(peer, amount_sats, &funding.psbt, feerate, announce)
        .await
    {
        Ok(i) => i,
        Err(e) => {
            unwind(rpc, None, &funding.psbt).await;
            return Err(V2Abort::Unwound(format!("openchannel_init: {e}")));
        }
    };

    let mut psbt = init.psbt.clone();
    let mut secured = false;
    for _ in 0..MAX_V2_UPDATE_ROUNDS {
        match rpc.openchannel_update(&init.channel_id, &psbt).await {
            Ok(update) => {
                psbt = update.psbt;
                if update.commitments_secured {
                    secured = true;
                    break;
                }
            }
            Err(e) => {
                unwind(rpc, Some(&init.channel_id), &funding.psbt).await;
                return Err(V2Abort::Unwound(format!("openchannel_update: {e}")));
            }
        }
    }
    if !secured {
        unwind(rpc, Some(&init.channel_id), &funding.psbt).await;
        return Err(V2Abort::Unwound(format!(
            "commitments not secured after {MAX_V2_UPDATE_ROUNDS} rounds"
        )));
    }

    let signed = match rpc.signpsbt(&psbt).await {
        Ok(s) => s,
        Err(e) => {
            unwind(rpc, Some(&init.channel_id), &funding.psbt).await;
            return Err(V2Abort::Unwound(format!("signpsbt: {e}")));
        }
    };

    // Past this point the signed PSBT may reach the peer; failures are not
    // retried through the single-funded path.
    let done = rpc
        .openchannel_signed(&init.channel_id, &signed.signed_psbt)
        .await
        .map_err(V2Abort::Fatal)?;

    Ok((done.channel_id, done.txid))
}

async fn unwind(rpc: &dyn LightningRpc, channel_id: Option<&str>, psbt: &str) {
    if let Some(id) = channel_id {
        if let Err(e) = rpc.openchannel_abort(id).await {
            warn!(channel_id = id, error = %e, "openchannel_abort failed during unwind");
        }
    }
    if let Err(e) = rpc.unreserveinputs(psbt).await {
        warn!(error = %e, "unreserveinputs failed during unwind");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted node: each step either succeeds with canned data or fails,
    /// and every RPC call is recorded in order.
    #[derive(Default)]
    struct ScriptedRpc {
        calls: Mutex<Vec<&'static str>>,
        fail_fundpsbt: bool,
        fail_init: bool,
        fail_update: bool,
        fail_signpsbt: bool,
        /// When set, `openchannel_update` never secures commitments.
        never_secure: bool,
    }

    impl ScriptedRpc {
        fn record(&self, name: &'static str) {
            self.calls.lock().unwrap().push(name);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn fail(name: &str) -> HiveError {
        HiveError::Unavailable(format!("{name} scripted failure"))
    }

    #[async_trait]
    impl LightningRpc for ScriptedRpc {
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
        async fn pay(&self, _b: &str) -> Result<PayResult, HiveError> {
            unimplemented!()
        }
        async fn fetchinvoice(&self, _o: &str, _a: u64) -> Result<FetchInvoice, HiveError> {
            unimplemented!()
        }
        async fn offer(&self, _a: &str, _d: &str) -> Result<OfferResult, HiveError> {
            unimplemented!()
        }
        async fn listforwards(&self, _s: Option<&str>) -> Result<Vec<Forward>, HiveError> {
            unimplemented!()
        }
        async fn estimated_feerate_sat_per_vb(&self) -> Result<u64, HiveError> {
            Ok(10)
        }

        async fn fundpsbt(&self, _a: Sats, _f: Option<&str>) -> Result<PsbtFunding, HiveError> {
            self.record("fundpsbt");
            if self.fail_fundpsbt {
                return Err(fail("fundpsbt"));
            }
            Ok(PsbtFunding { psbt: "psbt_data".into() })
        }

        async fn openchannel_init(
            &self,
            _p: &PeerId,
            _a: Sats,
            _psbt: &str,
            _f: Option<&str>,
            _announce: bool,
        ) -> Result<OpenChannelInit, HiveError> {
            self.record("openchannel_init");
            if self.fail_init {
                return Err(fail("openchannel_init"));
            }
            Ok(OpenChannelInit { channel_id: "chan_v2".into(), psbt: "init_psbt".into() })
        }

        async fn openchannel_update(
            &self,
            _c: &str,
            _psbt: &str,
        ) -> Result<OpenChannelUpdate, HiveError> {
            self.record("openchannel_update");
            if self.fail_update {
                return Err(fail("openchannel_update"));
            }
            Ok(OpenChannelUpdate {
                psbt: "updated_psbt".into(),
                commitments_secured: !self.never_secure,
            })
        }

        async fn openchannel_signed(
            &self,
            _c: &str,
            _s: &str,
        ) -> Result<ChannelFunding, HiveError> {
            self.record("openchannel_signed");
            Ok(ChannelFunding { channel_id: "chan_v2".into(), txid: "tx_v2".into() })
        }

        async fn openchannel_abort(&self, _c: &str) -> Result<(), HiveError> {
            self.record("openchannel_abort");
            Ok(())
        }

        async fn signpsbt(&self, _p: &str) -> Result<SignedPsbt, HiveError> {
            self.record("signpsbt");
            if self.fail_signpsbt {
                return Err(fail("signpsbt"));
            }
            Ok(SignedPsbt { signed_psbt: "signed_psbt_data".into() })
        }

        async fn unreserveinputs(&self, _p: &str) -> Result<(), HiveError> {
            self.record("unreserveinputs");
            Ok(())
        }

        async fn fundchannel(
            &self,
            _p: &PeerId,
            _a: Sats,
            _f: Option<&str>,
            _announce: bool,
        ) -> Result<ChannelFunding, HiveError> {
            self.record("fundchannel");
            Ok(ChannelFunding { channel_id: "chan_v1".into(), txid: "tx_v1".into() })
        }
    }

    fn peer() -> PeerId {
        PeerId::new(format!("02{}", "ab".repeat(32)))
    }

    #[tokio::test]
    async fn dual_fund_success() {
        let rpc = ScriptedRpc::default();
        let out = open_channel(&rpc, &peer(), 1_000_000, None, true).await.unwrap();
        assert_eq!(out.funding_type, FundingType::DualFunded);
        assert_eq!(out.channel_id, "chan_v2");
        assert_eq!(
            rpc.calls(),
            vec!["fundpsbt", "openchannel_init", "openchannel_update", "signpsbt", "openchannel_signed"]
        );
    }

    #[tokio::test]
    async fn init_failure_unreserves_without_abort() {
        let rpc = ScriptedRpc { fail_init: true, ..Default::default() };
        let out = open_channel(&rpc, &peer(), 500_000, None, true).await.unwrap();
        assert_eq!(out.funding_type, FundingType::SingleFunded);
        assert_eq!(out.channel_id, "chan_v1");
        let calls = rpc.calls();
        assert!(calls.contains(&"unreserveinputs"));
        assert!(!calls.contains(&"openchannel_abort"));
        assert!(calls.contains(&"fundchannel"));
    }

    #[tokio::test]
    async fn update_failure_aborts_then_falls_back() {
        let rpc = ScriptedRpc { fail_update: true, ..Default::default() };
        let out = open_channel(&rpc, &peer(), 500_000, None, true).await.unwrap();
        assert_eq!(out.funding_type, FundingType::SingleFunded);
        let calls = rpc.calls();
        assert!(calls.contains(&"openchannel_abort"));
        assert!(calls.contains(&"unreserveinputs"));
        assert!(calls.contains(&"fundchannel"));
    }

    #[tokio::test]
    async fn never_secured_exhausts_update_rounds() {
        let rpc = ScriptedRpc { never_secure: true, ..Default::default() };
        let out = open_channel(&rpc, &peer(), 500_000, None, true).await.unwrap();
        assert_eq!(out.funding_type, FundingType::SingleFunded);
        let updates = rpc.calls().iter().filter(|c| **c == "openchannel_update").count();
        assert_eq!(updates, MAX_V2_UPDATE_ROUNDS);
        assert!(rpc.calls().contains(&"openchannel_abort"));
    }

    #[tokio::test]
    async fn signpsbt_failure_aborts_then_falls_back() {
        let rpc = ScriptedRpc { fail_signpsbt: true, ..Default::default() };
        let out = open_channel(&rpc, &peer(), 500_000, None, true).await.unwrap();
        assert_eq!(out.funding_type, FundingType::SingleFunded);
        let calls = rpc.calls();
        assert!(calls.contains(&"openchannel_abort"));
        assert!(calls.contains(&"unreserveinputs"));
    }

    #[tokio::test]
    async fn fundpsbt_failure_goes_straight_to_single() {
        let rpc = ScriptedRpc { fail_fundpsbt: true, ..Default::default() };
        let out = open_channel(&rpc, &peer(), 500_000, None, true).await.unwrap();
        assert_eq!(out.funding_type, FundingType::SingleFunded);
        let calls = rpc.calls();
        assert!(!calls.contains(&"unreserveinputs"));
        assert!(!calls.contains(&"openchannel_abort"));
        assert!(calls.contains(&"fundchannel"));
    }
}
