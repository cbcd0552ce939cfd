//! Group-key validator.
//!
//! When a new epoch `E` completes DKG, epoch `E-1`'s group threshold-signs a
//! canonical message over `E`'s group public key, ratifying the handover.
//! Epoch 1 is the genesis exception and skips this phase entirely.

use tracing::info;

use crate::curve::{self, verify_bls, G1Point};
use crate::dkg;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventSink};
use crate::poly;
use crate::state::{GroupKeyValidationState, Participant, PartialSignature, Phase};
use crate::storage::{self, Storage};

/// Canonical encoding ratified by the previous epoch's group:
/// `previous_epoch_id(8B BE) || chain_id(32B) || group_public_key(96B)`.
pub fn canonical_message(
    previous_epoch_id: u64,
    chain_id: &[u8; 32],
    group_public_key: &crate::curve::G2Point,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 32 + 96);
    buf.extend_from_slice(&previous_epoch_id.to_be_bytes());
    buf.extend_from_slice(chain_id);
    buf.extend_from_slice(&group_public_key.0);
    buf
}

fn load_validation_state(
    storage: &dyn Storage,
    new_epoch_id: u64,
) -> CoreResult<Option<GroupKeyValidationState>> {
    storage::get_decoded(storage, &storage::key_group_validation(new_epoch_id))
}

fn save_validation_state(
    storage: &mut dyn Storage,
    state: &GroupKeyValidationState,
) -> CoreResult<()> {
    storage::put_encoded(
        storage,
        &storage::key_group_validation(state.new_epoch_id),
        state,
    )
}

/// `SubmitGroupKeyValidationSignature`.
///
/// Idempotent: once epoch `new_epoch_id` is `Signed`, further submissions
/// return success without mutating state.
pub fn submit_group_key_validation_signature(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    new_epoch_id: u64,
    chain_id: [u8; 32],
    participant_address: &str,
    slot_indices: Vec<u32>,
    signature: G1Point,
) -> CoreResult<()> {
    if new_epoch_id <= 1 {
        return Err(CoreError::FailedPrecondition(
            "epoch 1 is the genesis epoch and has no group-key validation phase".into(),
        ));
    }

    let new_epoch = dkg::load_epoch(storage, new_epoch_id)?;
    if new_epoch.phase == Phase::Signed {
        return Ok(());
    }
    if new_epoch.phase != Phase::Completed {
        return Err(CoreError::FailedPrecondition(format!(
            "epoch {new_epoch_id} has not completed DKG"
        )));
    }
    let group_public_key = new_epoch
        .group_public_key
        .ok_or_else(|| CoreError::Internal("completed epoch missing a group public key".into()))?;

    let previous_epoch_id = new_epoch_id - 1;
    let previous_epoch = dkg::load_epoch(storage, previous_epoch_id)?;

    let participant_index = previous_epoch
        .participant_index(participant_address)
        .ok_or_else(|| {
            CoreError::PermissionDenied(format!(
                "{participant_address} is not a participant of epoch {previous_epoch_id}"
            ))
        })?;
    let participant: &Participant = &previous_epoch.participants[participant_index];
    let expected_range: Vec<u32> = (participant.slot_start..=participant.slot_end).collect();
    if slot_indices != expected_range {
        return Err(CoreError::PermissionDenied(
            "slot_indices must exactly match the submitter's full assigned range".into(),
        ));
    }

    let message = canonical_message(previous_epoch_id, &chain_id, &group_public_key);
    let message_hash = curve::keccak256(&message);

    let mut state = match load_validation_state(storage, new_epoch_id)? {
        Some(state) => state,
        None => GroupKeyValidationState {
            new_epoch_id,
            previous_epoch_id,
            message_hash,
            partial_signatures: Vec::new(),
            slots_covered: 0,
        },
    };
    if state.has_submitted(participant_address) {
        return Err(CoreError::AlreadyExists(format!(
            "{participant_address} already submitted a group-key validation signature"
        )));
    }

    let valid_dealer_commitments: Vec<&[crate::curve::G2Point]> = previous_epoch
        .participants
        .iter()
        .enumerate()
        .filter(|(i, _)| previous_epoch.valid_dealers[*i])
        .map(|(i, _)| {
            previous_epoch.dealer_parts[i]
                .as_ref()
                .expect("valid dealer always submitted a part")
                .commitments
                .as_slice()
        })
        .collect();
    let individual_pubkey =
        poly::aggregate_individual_public_key(&valid_dealer_commitments, &slot_indices)?;
    let message_point = curve::hash_to_g1(&message_hash)?;
    if !verify_bls(&signature, &individual_pubkey, &message_point)? {
        return Err(CoreError::InvalidArgument(
            "partial signature failed pairing verification".into(),
        ));
    }

    state.partial_signatures.push(PartialSignature {
        participant_address: participant_address.to_string(),
        slot_indices: slot_indices.clone(),
        signature,
    });
    state.slots_covered += slot_indices.len() as u32;
    let quorum = crate::params::quorum_threshold(previous_epoch.i_total_slots);

    if state.slots_covered >= quorum {
        let final_signature = G1Point::sum(
            state
                .partial_signatures
                .iter()
                .map(|p| p.signature),
        )?;
        let mut new_epoch = new_epoch;
        new_epoch.validation_signature = Some(final_signature);
        new_epoch.phase = Phase::Signed;
        storage::put_encoded(storage, &storage::key_epoch_dkg(new_epoch_id), &new_epoch)?;
        storage.delete(&storage::key_group_validation(new_epoch_id));

        info!(new_epoch_id, "group key validated");
        events.emit(Event::GroupKeyValidated {
            new_epoch_id,
            final_signature,
        });
    } else {
        save_validation_state(storage, &state)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dkg::{initiate_key_generation, submit_dealer_part, submit_verification_vector, tick_dkg};
    use crate::events::RecordingEventSink;
    use crate::params::Params;
    use crate::storage::MemoryStorage;
    use blstrs::Scalar;

    fn setup_completed_epoch(
        storage: &mut MemoryStorage,
        events: &mut RecordingEventSink,
        params: &Params,
        epoch_id: u64,
        n: usize,
        secret_seed: u64,
    ) -> (Vec<crate::curve::G2Point>, u64) {
        let participants: Vec<(String, Vec<u8>, f64)> =
            (0..n).map(|i| (format!("p{i}"), vec![], 1.0)).collect();
        initiate_key_generation(storage, events, params, epoch_id, &participants, 0).unwrap();
        let t = params.t_slots_degree() as usize;
        let mut commitments_per_dealer = Vec::new();
        for (i, name) in (0..n).map(|i| (i, format!("p{i}"))) {
            let commitments: Vec<_> = (0..=t)
                .map(|j| {
                    crate::curve::G2Point::generator()
                        .mul_scalar(&Scalar::from(secret_seed + i as u64 * 100 + j as u64))
                        .unwrap()
                })
                .collect();
            submit_dealer_part(
                storage,
                events,
                epoch_id,
                &name,
                commitments.clone(),
                vec![vec![]; n],
                0,
            )
            .unwrap();
            commitments_per_dealer.push(commitments);
        }
        tick_dkg(storage, events, params, epoch_id, params.dealing_phase_duration_blocks).unwrap();
        for i in 0..n {
            submit_verification_vector(
                storage,
                events,
                epoch_id,
                &format!("p{i}"),
                vec![true; n],
                params.dealing_phase_duration_blocks,
            )
            .unwrap();
        }
        tick_dkg(
            storage,
            events,
            params,
            epoch_id,
            params.dealing_phase_duration_blocks + params.verification_phase_duration_blocks,
        )
        .unwrap();
        (
            commitments_per_dealer.into_iter().flatten().take(0).collect(),
            0,
        )
    }

    #[test]
    fn genesis_epoch_has_no_validation_phase() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let err = submit_group_key_validation_signature(
            &mut storage,
            &mut events,
            1,
            [0u8; 32],
            "p0",
            vec![0],
            crate::curve::G1Point::identity(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::FailedPrecondition(_)));
    }

    /// Mirrors the coefficient formula `setup_completed_epoch` gives each
    /// dealer (`secret_seed + dealer_index*100 + power`), so a test can
    /// reconstruct the scalar secret behind a participant's individual
    /// public key without the core ever exposing it.
    fn dealer_coeffs(secret_seed: u64, dealer_index: u64, t: usize) -> Vec<u64> {
        (0..=t as u64).map(|j| secret_seed + dealer_index * 100 + j).collect()
    }

    fn eval_poly_scalar(coeffs: &[u64], x: u32) -> u64 {
        coeffs
            .iter()
            .enumerate()
            .map(|(i, c)| c * (x as u64).pow(i as u32))
            .sum()
    }

    fn individual_secret_scalar(n: usize, t: usize, secret_seed: u64, owned_slots: &[u32]) -> u64 {
        (0..n)
            .map(|dealer_index| {
                let coeffs = dealer_coeffs(secret_seed, dealer_index as u64, t);
                owned_slots
                    .iter()
                    .map(|&x| eval_poly_scalar(&coeffs, x))
                    .sum::<u64>()
            })
            .sum()
    }

    #[test]
    fn quorum_of_predecessor_ratifies_and_is_idempotent() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.i_total_slots = 4;
        params.t_slots_degree_offset = 2;
        params.dealing_phase_duration_blocks = 5;
        params.verification_phase_duration_blocks = 3;

        let secret_seed = 1u64;
        setup_completed_epoch(&mut storage, &mut events, &params, 1, 2, secret_seed);
        setup_completed_epoch(&mut storage, &mut events, &params, 2, 2, 99);

        let previous_epoch = dkg::load_epoch(&storage, 1).unwrap();
        let new_epoch = dkg::load_epoch(&storage, 2).unwrap();
        let chain_id = [7u8; 32];
        let message = canonical_message(1, &chain_id, &new_epoch.group_public_key.unwrap());
        let message_hash = curve::keccak256(&message);
        let message_point = curve::hash_to_g1(&message_hash).unwrap();

        let t = params.t_slots_degree() as usize;
        for (participant, name) in previous_epoch.participants.iter().zip(["p0", "p1"]) {
            let slot_indices: Vec<u32> = (participant.slot_start..=participant.slot_end).collect();
            let secret = individual_secret_scalar(2, t, secret_seed, &slot_indices);
            let signature = message_point.mul_scalar(&Scalar::from(secret)).unwrap();

            submit_group_key_validation_signature(
                &mut storage,
                &mut events,
                2,
                chain_id,
                name,
                slot_indices,
                signature,
            )
            .unwrap();
        }

        let new_epoch = dkg::load_epoch(&storage, 2).unwrap();
        assert_eq!(new_epoch.phase, Phase::Signed);
        assert!(new_epoch.validation_signature.is_some());
        assert!(load_validation_state(&storage, 2).unwrap().is_none());
        assert!(events
            .events
            .iter()
            .any(|e| matches!(e, Event::GroupKeyValidated { new_epoch_id: 2, .. })));

        // Resubmitting after SIGNED is a no-op, not an error.
        let participant = &previous_epoch.participants[0];
        let slot_indices: Vec<u32> = (participant.slot_start..=participant.slot_end).collect();
        submit_group_key_validation_signature(
            &mut storage,
            &mut events,
            2,
            chain_id,
            "p0",
            slot_indices,
            crate::curve::G1Point::identity(),
        )
        .unwrap();
    }

    #[test]
    fn wrong_slot_range_is_rejected() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.i_total_slots = 4;
        params.t_slots_degree_offset = 2;
        params.dealing_phase_duration_blocks = 5;
        params.verification_phase_duration_blocks = 3;

        setup_completed_epoch(&mut storage, &mut events, &params, 1, 2, 1);
        setup_completed_epoch(&mut storage, &mut events, &params, 2, 2, 99);

        let err = submit_group_key_validation_signature(
            &mut storage,
            &mut events,
            2,
            [0u8; 32],
            "p0",
            vec![0], // p0 owns slots [0,1], not just [0]
            crate::curve::G1Point::identity(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));
    }

    #[test]
    fn non_participant_is_rejected() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.i_total_slots = 4;
        params.t_slots_degree_offset = 2;
        params.dealing_phase_duration_blocks = 5;
        params.verification_phase_duration_blocks = 3;

        setup_completed_epoch(&mut storage, &mut events, &params, 1, 2, 1);
        setup_completed_epoch(&mut storage, &mut events, &params, 2, 2, 99);

        let err = submit_group_key_validation_signature(
            &mut storage,
            &mut events,
            2,
            [0u8; 32],
            "ghost",
            vec![0, 1],
            crate::curve::G1Point::identity(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied(_)));
    }
}
