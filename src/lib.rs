//! Deterministic BLS threshold-signature core.
//!
//! Runs inside a replicated state machine: every handler call and every
//! [`Core::advance_block`] tick is expected to execute identically, in the
//! same order, on every node that replays the same inputs. There is no
//! concurrency inside this crate — callers own sequencing.
//!
//! The core is organized as a weighted DKG phase machine ([`dkg`]) that hands
//! off, epoch over epoch, to a group-key ratification step ([`groupkey`]),
//! plus a threshold signing engine ([`signing`]) that consumes whichever
//! epoch's group key is currently established. [`curve`] and [`poly`] hold
//! the BLS12-381 and polynomial-commitment primitives both of those build on;
//! [`slots`] turns participant weights into the slot ranges the rest of the
//! crate signs and votes over.

pub mod curve;
pub mod dkg;
pub mod error;
pub mod events;
pub mod groupkey;
pub mod handlers;
pub mod params;
pub mod poly;
pub mod signing;
pub mod slots;
pub mod state;
pub mod storage;

pub use curve::{G1Point, G2Point};
pub use error::{CoreError, CoreResult};
pub use events::{Event, EventSink};
pub use params::Params;
pub use state::{EpochDkg, Phase, RequestStatus, ThresholdSigningRequest};
pub use storage::Storage;

/// A thin, stateless facade over the handlers in [`handlers`], binding a
/// storage and event sink for the duration of a single call. Host
/// integrations typically construct one of these per inbound message or per
/// block, not once for the process lifetime. Parameters are read fresh from
/// storage on every call that needs them — `Core` holds no parameter state
/// of its own; call [`Core::install_params`] once before anything else.
pub struct Core<'a> {
    storage: &'a mut dyn Storage,
    events: &'a mut dyn EventSink,
}

impl<'a> Core<'a> {
    pub fn new(storage: &'a mut dyn Storage, events: &'a mut dyn EventSink) -> Self {
        Core { storage, events }
    }

    /// Validates and persists `params` through the storage façade. Must be
    /// called once before any other method.
    pub fn install_params(&mut self, params: Params) -> CoreResult<()> {
        params::install(self.storage, &params)
    }

    pub fn initiate_key_generation(
        &mut self,
        epoch_id: u64,
        finalized_participants: &[(String, Vec<u8>, f64)],
        current_block_height: u64,
    ) -> CoreResult<()> {
        let span = tracing::info_span!("initiate_key_generation", epoch_id);
        let _enter = span.enter();
        let params = params::load(self.storage)?;
        dkg::initiate_key_generation(
            self.storage,
            self.events,
            &params,
            epoch_id,
            finalized_participants,
            current_block_height,
        )
    }

    pub fn submit_dealer_part(
        &mut self,
        epoch_id: u64,
        dealer_address: &str,
        commitments: Vec<G2Point>,
        participant_shares: Vec<Vec<u8>>,
        current_block_height: u64,
    ) -> CoreResult<()> {
        let span = tracing::info_span!("submit_dealer_part", epoch_id, dealer_address);
        let _enter = span.enter();
        handlers::submit_dealer_part(
            self.storage,
            self.events,
            epoch_id,
            dealer_address,
            commitments,
            participant_shares,
            current_block_height,
        )
    }

    pub fn submit_verification_vector(
        &mut self,
        epoch_id: u64,
        participant_address: &str,
        dealer_validity: Vec<bool>,
        current_block_height: u64,
    ) -> CoreResult<()> {
        let span = tracing::info_span!("submit_verification_vector", epoch_id, participant_address);
        let _enter = span.enter();
        handlers::submit_verification_vector(
            self.storage,
            self.events,
            epoch_id,
            participant_address,
            dealer_validity,
            current_block_height,
        )
    }

    pub fn submit_group_key_validation_signature(
        &mut self,
        new_epoch_id: u64,
        chain_id: [u8; 32],
        participant_address: &str,
        slot_indices: Vec<u32>,
        signature: G1Point,
    ) -> CoreResult<()> {
        let span = tracing::info_span!("submit_group_key_validation_signature", new_epoch_id, participant_address);
        let _enter = span.enter();
        handlers::submit_group_key_validation_signature(
            self.storage,
            self.events,
            new_epoch_id,
            chain_id,
            participant_address,
            slot_indices,
            signature,
        )
    }

    pub fn request_threshold_signature(
        &mut self,
        request_id: Vec<u8>,
        current_epoch_id: u64,
        chain_id: [u8; 32],
        data: Vec<[u8; 32]>,
        current_block_height: u64,
    ) -> CoreResult<()> {
        let span = tracing::info_span!("request_threshold_signature", current_epoch_id);
        let _enter = span.enter();
        let params = params::load(self.storage)?;
        handlers::request_threshold_signature(
            self.storage,
            self.events,
            &params,
            request_id,
            current_epoch_id,
            chain_id,
            data,
            current_block_height,
        )
    }

    pub fn submit_partial_signature(
        &mut self,
        request_id: &[u8],
        participant_address: &str,
        slot_indices: Vec<u32>,
        signature: G1Point,
        current_block_height: u64,
    ) -> CoreResult<()> {
        let span = tracing::info_span!("submit_partial_signature", participant_address);
        let _enter = span.enter();
        handlers::submit_partial_signature(
            self.storage,
            self.events,
            request_id,
            participant_address,
            slot_indices,
            signature,
            current_block_height,
        )
    }

    /// Advances both the DKG phase machine and the signing engine's
    /// expiration sweep by one block. Idempotent at a fixed block height.
    pub fn advance_block(&mut self, current_block_height: u64) -> CoreResult<()> {
        let span = tracing::info_span!("advance_block", current_block_height);
        let _enter = span.enter();
        let params = params::load(self.storage)?;
        handlers::advance_block(self.storage, self.events, &params, current_block_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::storage::MemoryStorage;

    #[test]
    fn facade_delegates_through_to_the_phase_machine() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.i_total_slots = 10;
        params.t_slots_degree_offset = 5;
        params.dealing_phase_duration_blocks = 5;

        let mut core = Core::new(&mut storage, &mut events);
        core.install_params(params).unwrap();
        let participants = vec![("p0".to_string(), vec![], 1.0), ("p1".to_string(), vec![], 1.0)];
        core.initiate_key_generation(1, &participants, 0).unwrap();
        core.advance_block(5).unwrap();

        drop(core);
        let epoch = dkg::load_epoch(&storage, 1).unwrap();
        assert_eq!(epoch.phase, Phase::Failed);
    }

    #[test]
    fn calling_a_handler_before_installing_params_fails_precondition() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut core = Core::new(&mut storage, &mut events);
        let err = core.advance_block(0).unwrap_err();
        assert!(matches!(err, CoreError::FailedPrecondition(_)));
    }
}
