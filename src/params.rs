//! Governance-set parameters, validated once on install.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::storage::{self, Storage};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub i_total_slots: u32,
    pub t_slots_degree_offset: u32,
    pub dealing_phase_duration_blocks: u64,
    pub verification_phase_duration_blocks: u64,
    pub signing_deadline_blocks: u64,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            i_total_slots: 100,
            t_slots_degree_offset: 50,
            dealing_phase_duration_blocks: 100,
            verification_phase_duration_blocks: 100,
            signing_deadline_blocks: 50,
        }
    }
}

impl Params {
    /// `t = N - offset`, the polynomial degree dealers commit to.
    pub fn t_slots_degree(&self) -> u32 {
        self.i_total_slots - self.t_slots_degree_offset
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.i_total_slots < 2 {
            return Err(CoreError::InvalidArgument(
                "i_total_slots must be >= 2".into(),
            ));
        }
        if self.t_slots_degree_offset >= self.i_total_slots {
            return Err(CoreError::InvalidArgument(
                "t_slots_degree_offset must be < i_total_slots".into(),
            ));
        }
        if self.dealing_phase_duration_blocks == 0
            || self.verification_phase_duration_blocks == 0
            || self.signing_deadline_blocks == 0
        {
            return Err(CoreError::InvalidArgument(
                "phase/deadline durations must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// A quorum of slots is strictly more than half of `total_slots`:
/// `⌊N/2⌋ + 1`.
pub fn quorum_threshold(total_slots: u32) -> u32 {
    total_slots / 2 + 1
}

/// Validates and persists `params` at the `"p_bls"` storage key. The only
/// process-wide install path; there is no in-memory singleton.
pub fn install(storage: &mut dyn Storage, params: &Params) -> CoreResult<()> {
    params.validate()?;
    storage::put_encoded(storage, &storage::key_params(), params)
}

/// Reads the installed parameter set, read fresh on every handler call.
pub fn load(storage: &dyn Storage) -> CoreResult<Params> {
    storage::get_decoded(storage, &storage::key_params())?
        .ok_or_else(|| CoreError::FailedPrecondition("params have not been installed".into()))
}
