use serde::{Deserialize, Serialize};

/// Multi-dimensional danger assessment for a management action.
///
/// Each dimension is scored 1-10. The overall danger is the max of the
/// dimensions, not the sum: one catastrophic dimension makes the action
/// dangerous regardless of how safe the rest look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DangerScore {
    /// 1 = instant undo, 10 = irreversible.
    pub reversibility: u8,
    /// 1 = zero sats at risk, 10 = >10M sats.
    pub financial_exposure: u8,
    /// 1 = no compounding, 10 = permanent damage.
    pub time_sensitivity: u8,
    /// 1 = single metric, 10 = entire fleet.
    pub blast_radius: u8,
    /// 1 = trivial recovery, 10 = unrecoverable.
    pub recovery_difficulty: u8,
}

impl DangerScore {
    /// All dimensions must land in [1, 10].
    pub const fn new(
        reversibility: u8,
        financial_exposure: u8,
        time_sensitivity: u8,
        blast_radius: u8,
        recovery_difficulty: u8,
    ) -> Self {
        assert!(reversibility >= 1 && reversibility <= 10);
        assert!(financial_exposure >= 1 && financial_exposure <= 10);
        assert!(time_sensitivity >= 1 && time_sensitivity <= 10);
        assert!(blast_radius >= 1 && blast_radius <= 10);
        assert!(recovery_difficulty >= 1 && recovery_difficulty <= 10);
        Self {
            reversibility,
            financial_exposure,
            time_sensitivity,
            blast_radius,
            recovery_difficulty,
        }
    }

    /// Overall danger: the maximum dimension.
    pub fn total(&self) -> u8 {
        self.reversibility
            .max(self.financial_exposure)
            .max(self.time_sensitivity)
            .max(self.blast_radius)
            .max(self.recovery_difficulty)
    }
}
