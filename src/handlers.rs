//! Message handlers: the four externally-triggered actions
//! plus the per-block tick entry point. Each handler loads nothing itself —
//! it is a thin, validated pass-through into the owning component, so the
//! stable error taxonomy is produced at a single, auditable seam.

use crate::curve::{self, G1Point, G2Point};
use crate::dkg;
use crate::error::CoreResult;
use crate::events::EventSink;
use crate::groupkey;
use crate::params::Params;
use crate::signing;
use crate::storage::Storage;

const DOMAIN_SEPARATION_TAG_PREIMAGE: &[u8] = b"CUSTOM_THRESHOLD_SIGNATURE";

/// keccak-256 of `"CUSTOM_THRESHOLD_SIGNATURE"`, forced as the first data
/// chunk of every threshold signing request before it reaches the signing
/// engine, so requests made for this purpose can never collide with some
/// other use of the same group key.
pub fn domain_separation_tag() -> [u8; 32] {
    curve::keccak256(DOMAIN_SEPARATION_TAG_PREIMAGE)
}

pub fn request_threshold_signature(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    params: &Params,
    request_id: Vec<u8>,
    current_epoch_id: u64,
    chain_id: [u8; 32],
    data: Vec<[u8; 32]>,
    current_block_height: u64,
) -> CoreResult<()> {
    let mut tagged_data = Vec::with_capacity(data.len() + 1);
    tagged_data.push(domain_separation_tag());
    tagged_data.extend(data);
    signing::request_threshold_signature(
        storage,
        events,
        params,
        request_id,
        current_epoch_id,
        chain_id,
        tagged_data,
        current_block_height,
    )
}

pub fn submit_dealer_part(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    epoch_id: u64,
    dealer_address: &str,
    commitments: Vec<G2Point>,
    participant_shares: Vec<Vec<u8>>,
    current_block_height: u64,
) -> CoreResult<()> {
    dkg::submit_dealer_part(
        storage,
        events,
        epoch_id,
        dealer_address,
        commitments,
        participant_shares,
        current_block_height,
    )
}

pub fn submit_verification_vector(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    epoch_id: u64,
    participant_address: &str,
    dealer_validity: Vec<bool>,
    current_block_height: u64,
) -> CoreResult<()> {
    dkg::submit_verification_vector(
        storage,
        events,
        epoch_id,
        participant_address,
        dealer_validity,
        current_block_height,
    )
}

pub fn submit_group_key_validation_signature(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    new_epoch_id: u64,
    chain_id: [u8; 32],
    participant_address: &str,
    slot_indices: Vec<u32>,
    signature: G1Point,
) -> CoreResult<()> {
    groupkey::submit_group_key_validation_signature(
        storage,
        events,
        new_epoch_id,
        chain_id,
        participant_address,
        slot_indices,
        signature,
    )
}

pub fn submit_partial_signature(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    request_id: &[u8],
    participant_address: &str,
    slot_indices: Vec<u32>,
    signature: G1Point,
    current_block_height: u64,
) -> CoreResult<()> {
    signing::add_partial_signature(
        storage,
        events,
        request_id,
        participant_address,
        slot_indices,
        signature,
        current_block_height,
    )
}

/// The per-block tick: drains both the DKG phase machine's deadline
/// and the signing engine's expiration index for the active epoch. A chain
/// with no active DKG round skips the phase-machine tick entirely.
pub fn advance_block(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    params: &Params,
    current_block_height: u64,
) -> CoreResult<()> {
    if let Some(epoch_id) = dkg::active_epoch_id(storage)? {
        dkg::tick_dkg(storage, events, params, epoch_id, current_block_height)?;
    }
    signing::tick_expirations(storage, events, current_block_height)?;
    Ok(())
}
