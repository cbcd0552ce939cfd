//! DKG phase machine.

use tracing::{info, warn};

use crate::curve::G2Point;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventSink};
use crate::params::{quorum_threshold, Params};
use crate::state::{DealerPart, EpochDkg, Participant, Phase, VerificationSubmission};
use crate::storage::{self, Storage};

pub fn load_epoch(storage: &dyn Storage, epoch_id: u64) -> CoreResult<EpochDkg> {
    storage::get_decoded(storage, &storage::key_epoch_dkg(epoch_id))?
        .ok_or_else(|| CoreError::NotFound(format!("epoch {epoch_id} does not exist")))
}

fn save_epoch(storage: &mut dyn Storage, epoch: &EpochDkg) -> CoreResult<()> {
    storage::put_encoded(storage, &storage::key_epoch_dkg(epoch.epoch_id), epoch)
}

fn set_active_epoch_id(storage: &mut dyn Storage, epoch_id: u64) -> CoreResult<()> {
    storage::put_encoded(storage, &storage::key_active_epoch_id(), &epoch_id)
}

pub fn clear_active_epoch_id(storage: &mut dyn Storage) {
    storage.delete(&storage::key_active_epoch_id());
}

pub fn active_epoch_id(storage: &dyn Storage) -> CoreResult<Option<u64>> {
    storage::get_decoded(storage, &storage::key_active_epoch_id())
}

/// `InitiateKeyGeneration`: installs a new `EpochDkg` in `Dealing`.
///
/// `finalized_participants` carries `(address, secp256k1_public_key,
/// weight)` triples in the order the external participant/weight selection
/// module (out of scope) finalized them; slot ranges are derived
/// here via the slot assigner.
pub fn initiate_key_generation(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    params: &Params,
    epoch_id: u64,
    finalized_participants: &[(String, Vec<u8>, f64)],
    current_block_height: u64,
) -> CoreResult<()> {
    if epoch_id == 0 {
        return Err(CoreError::InvalidArgument("epoch_id must be non-zero".into()));
    }
    if storage::get_decoded::<EpochDkg>(storage, &storage::key_epoch_dkg(epoch_id))?.is_some() {
        return Err(CoreError::AlreadyExists(format!(
            "epoch {epoch_id} already exists"
        )));
    }

    let weights: Vec<f64> = finalized_participants.iter().map(|(_, _, w)| *w).collect();
    let ranges = crate::slots::assign_slots(&weights, params.i_total_slots)?;
    let participants: Vec<Participant> = finalized_participants
        .iter()
        .zip(ranges.iter())
        .map(|((address, pk, weight), range)| Participant {
            address: address.clone(),
            secp256k1_public_key: pk.clone(),
            weight: *weight,
            slot_start: range.start,
            slot_end: range.end,
        })
        .collect();

    let dealing_deadline_block = current_block_height + params.dealing_phase_duration_blocks;
    let epoch = EpochDkg::new(
        epoch_id,
        params.i_total_slots,
        params.t_slots_degree(),
        participants.clone(),
        dealing_deadline_block,
    );
    save_epoch(storage, &epoch)?;
    set_active_epoch_id(storage, epoch_id)?;

    info!(epoch_id, n = params.i_total_slots, "DKG initiated");
    events.emit(Event::KeyGenerationInitiated {
        epoch_id,
        i_total_slots: params.i_total_slots,
        t_slots_degree: params.t_slots_degree(),
        participants: participants.iter().map(|p| p.address.clone()).collect(),
    });
    Ok(())
}

/// `SubmitDealerPart`.
pub fn submit_dealer_part(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    epoch_id: u64,
    dealer_address: &str,
    commitments: Vec<G2Point>,
    participant_shares: Vec<Vec<u8>>,
    current_block_height: u64,
) -> CoreResult<()> {
    let mut epoch = load_epoch(storage, epoch_id)?;
    if epoch.phase != Phase::Dealing {
        return Err(CoreError::FailedPrecondition(format!(
            "epoch {epoch_id} is not in the dealing phase"
        )));
    }
    if current_block_height > epoch.dealing_deadline_block {
        return Err(CoreError::DeadlineExceeded(
            "dealing phase deadline has passed".into(),
        ));
    }
    let index = epoch
        .participant_index(dealer_address)
        .ok_or_else(|| CoreError::PermissionDenied(format!("{dealer_address} is not a participant")))?;
    if epoch.dealer_parts[index].is_some() {
        return Err(CoreError::AlreadyExists(format!(
            "{dealer_address} already submitted a dealer part"
        )));
    }
    if commitments.len() != (epoch.t_slots_degree as usize + 1) {
        return Err(CoreError::InvalidArgument(format!(
            "expected {} commitments, got {}",
            epoch.t_slots_degree + 1,
            commitments.len()
        )));
    }
    if participant_shares.len() != epoch.participants.len() {
        return Err(CoreError::InvalidArgument(format!(
            "expected {} participant shares, got {}",
            epoch.participants.len(),
            participant_shares.len()
        )));
    }

    epoch.dealer_parts[index] = Some(DealerPart {
        dealer_address: dealer_address.to_string(),
        commitments,
        participant_shares,
    });
    save_epoch(storage, &epoch)?;

    events.emit(Event::DealerPartSubmitted {
        epoch_id,
        dealer_address: dealer_address.to_string(),
    });
    Ok(())
}

/// `SubmitVerificationVector`.
pub fn submit_verification_vector(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    epoch_id: u64,
    participant_address: &str,
    dealer_validity: Vec<bool>,
    current_block_height: u64,
) -> CoreResult<()> {
    let mut epoch = load_epoch(storage, epoch_id)?;
    if epoch.phase != Phase::Verifying {
        return Err(CoreError::FailedPrecondition(format!(
            "epoch {epoch_id} is not in the verifying phase"
        )));
    }
    if current_block_height >= epoch.verifying_deadline_block {
        return Err(CoreError::DeadlineExceeded(
            "verification phase deadline has passed".into(),
        ));
    }
    let index = epoch
        .participant_index(participant_address)
        .ok_or_else(|| {
            CoreError::PermissionDenied(format!("{participant_address} is not a participant"))
        })?;
    if dealer_validity.len() != epoch.participants.len() {
        return Err(CoreError::InvalidArgument(format!(
            "expected a vote vector of length {}, got {}",
            epoch.participants.len(),
            dealer_validity.len()
        )));
    }
    if epoch.verification_submissions[index].is_submitted() {
        return Err(CoreError::AlreadyExists(format!(
            "{participant_address} already submitted a verification vector"
        )));
    }

    epoch.verification_submissions[index] = VerificationSubmission { dealer_validity };
    save_epoch(storage, &epoch)?;

    events.emit(Event::VerificationVectorSubmitted {
        epoch_id,
        participant_address: participant_address.to_string(),
    });
    Ok(())
}

/// Advances the DKG phase machine by block height. Idempotent: calling twice at the same
/// height after a transition has already been applied is a no-op because the
/// phase guard below no longer matches.
pub fn tick_dkg(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    params: &Params,
    epoch_id: u64,
    current_block_height: u64,
) -> CoreResult<()> {
    let epoch = load_epoch(storage, epoch_id)?;
    match epoch.phase {
        Phase::Dealing if current_block_height >= epoch.dealing_deadline_block => {
            transition_to_verifying(storage, events, params, epoch)
        }
        Phase::Verifying if current_block_height >= epoch.verifying_deadline_block => {
            complete_dkg(storage, events, epoch)
        }
        _ => Ok(()),
    }
}

fn fail_epoch(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    mut epoch: EpochDkg,
    reason: &str,
) -> CoreResult<()> {
    epoch.phase = Phase::Failed;
    let epoch_id = epoch.epoch_id;
    save_epoch(storage, &epoch)?;
    if active_epoch_id(storage)? == Some(epoch_id) {
        clear_active_epoch_id(storage);
    }
    warn!(epoch_id, reason, "DKG failed");
    events.emit(Event::DkgFailed {
        epoch_id,
        reason: reason.to_string(),
    });
    Ok(())
}

fn transition_to_verifying(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    params: &Params,
    mut epoch: EpochDkg,
) -> CoreResult<()> {
    let slots_covered: u32 = epoch
        .participants
        .iter()
        .enumerate()
        .filter(|(i, _)| epoch.dealer_parts[*i].is_some())
        .map(|(_, p)| p.slot_count())
        .sum();

    if slots_covered < quorum_threshold(epoch.i_total_slots) {
        return fail_epoch(storage, events, epoch, "insufficient dealer participation");
    }

    epoch.phase = Phase::Verifying;
    epoch.verifying_deadline_block =
        epoch.dealing_deadline_block + params.verification_phase_duration_blocks;
    let epoch_id = epoch.epoch_id;
    save_epoch(storage, &epoch)?;
    info!(epoch_id, slots_covered, "DKG entered verifying phase");
    Ok(())
}

/// `CompleteDKG`.
fn complete_dkg(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    mut epoch: EpochDkg,
) -> CoreResult<()> {
    let verifier_slots: u32 = epoch
        .participants
        .iter()
        .enumerate()
        .filter(|(i, _)| epoch.verification_submissions[*i].is_submitted())
        .map(|(_, p)| p.slot_count())
        .sum();

    if verifier_slots < quorum_threshold(epoch.i_total_slots) {
        return fail_epoch(storage, events, epoch, "insufficient verifier participation");
    }

    let submitted_count = epoch
        .verification_submissions
        .iter()
        .filter(|v| v.is_submitted())
        .count();

    let mut valid_dealers = vec![false; epoch.participants.len()];
    for dealer_index in 0..epoch.participants.len() {
        if epoch.dealer_parts[dealer_index].is_none() {
            continue;
        }
        let yes_votes = epoch
            .verification_submissions
            .iter()
            .filter(|v| v.is_submitted() && v.dealer_validity[dealer_index])
            .count();
        // Strictly more than half of submitted verifiers, not a tie.
        if yes_votes * 2 > submitted_count {
            valid_dealers[dealer_index] = true;
        }
    }

    let constant_terms: Result<Vec<G2Point>, _> = epoch
        .participants
        .iter()
        .enumerate()
        .filter(|(i, _)| valid_dealers[*i])
        .map(|(i, _)| {
            epoch.dealer_parts[i]
                .as_ref()
                .expect("valid dealer always submitted a part")
                .commitments[0]
        })
        .map(Ok::<G2Point, CoreError>)
        .collect();
    let group_public_key = G2Point::sum(constant_terms?)?;

    epoch.valid_dealers = valid_dealers;
    epoch.group_public_key = Some(group_public_key);
    epoch.phase = Phase::Completed;
    let epoch_id = epoch.epoch_id;
    save_epoch(storage, &epoch)?;

    info!(epoch_id, "DKG completed");
    events.emit(Event::DkgCompleted {
        epoch_id,
        group_public_key,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::storage::MemoryStorage;

    fn participants(n: usize) -> Vec<(String, Vec<u8>, f64)> {
        (0..n)
            .map(|i| (format!("p{i}"), vec![i as u8], 1.0))
            .collect()
    }

    fn commitments(t: usize, seed: u64) -> Vec<G2Point> {
        use blstrs::Scalar;
        (0..=t)
            .map(|i| {
                G2Point::generator()
                    .mul_scalar(&Scalar::from(seed + i as u64))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn happy_path_completes_with_two_of_three_dealers() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.i_total_slots = 100;
        params.t_slots_degree_offset = 50;
        params.dealing_phase_duration_blocks = 5;
        params.verification_phase_duration_blocks = 3;

        initiate_key_generation(&mut storage, &mut events, &params, 1, &participants(3), 0)
            .unwrap();

        let t = params.t_slots_degree() as usize;
        submit_dealer_part(
            &mut storage,
            &mut events,
            1,
            "p0",
            commitments(t, 1),
            vec![vec![], vec![], vec![]],
            0,
        )
        .unwrap();
        submit_dealer_part(
            &mut storage,
            &mut events,
            1,
            "p1",
            commitments(t, 2),
            vec![vec![], vec![], vec![]],
            0,
        )
        .unwrap();

        tick_dkg(&mut storage, &mut events, &params, 1, 5).unwrap();
        let epoch = load_epoch(&storage, 1).unwrap();
        assert_eq!(epoch.phase, Phase::Verifying);

        submit_verification_vector(&mut storage, &mut events, 1, "p0", vec![true, true, false], 5)
            .unwrap();
        submit_verification_vector(&mut storage, &mut events, 1, "p1", vec![true, true, false], 5)
            .unwrap();

        tick_dkg(&mut storage, &mut events, &params, 1, 8).unwrap();
        let epoch = load_epoch(&storage, 1).unwrap();
        assert_eq!(epoch.phase, Phase::Completed);
        assert_eq!(epoch.valid_dealers, vec![true, true, false]);
        assert!(epoch.group_public_key.is_some());
    }

    #[test]
    fn insufficient_dealing_fails_and_clears_active_epoch() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.i_total_slots = 100;
        params.dealing_phase_duration_blocks = 5;

        initiate_key_generation(
            &mut storage,
            &mut events,
            &params,
            7,
            &[
                ("p0".to_string(), vec![], 33.0),
                ("p1".to_string(), vec![], 33.0),
                ("p2".to_string(), vec![], 34.0),
            ],
            0,
        )
        .unwrap();

        let t = params.t_slots_degree() as usize;
        submit_dealer_part(
            &mut storage,
            &mut events,
            7,
            "p0",
            commitments(t, 1),
            vec![vec![], vec![], vec![]],
            0,
        )
        .unwrap();

        tick_dkg(&mut storage, &mut events, &params, 7, 5).unwrap();
        let epoch = load_epoch(&storage, 7).unwrap();
        assert_eq!(epoch.phase, Phase::Failed);
        assert_eq!(active_epoch_id(&storage).unwrap(), None);
    }

    #[test]
    fn majority_split_keeps_only_dealers_with_strict_majority() {
        // 5 dealers, 3 verifiers vote [T,T,T,F,F], [T,T,F,F,F], [T,F,T,T,F]
        // -> valid_dealers = [T,T,T,F,F]
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.i_total_slots = 100;
        params.dealing_phase_duration_blocks = 5;
        params.verification_phase_duration_blocks = 3;

        initiate_key_generation(&mut storage, &mut events, &params, 9, &participants(5), 0)
            .unwrap();
        let t = params.t_slots_degree() as usize;
        for (i, name) in ["p0", "p1", "p2", "p3", "p4"].iter().enumerate() {
            submit_dealer_part(
                &mut storage,
                &mut events,
                9,
                name,
                commitments(t, i as u64 + 10),
                vec![vec![]; 5],
                0,
            )
            .unwrap();
        }
        tick_dkg(&mut storage, &mut events, &params, 9, 5).unwrap();

        let votes = [
            vec![true, true, true, false, false],
            vec![true, true, false, false, false],
            vec![true, false, true, true, false],
        ];
        for (name, v) in ["p0", "p1", "p2"].iter().zip(votes.into_iter()) {
            submit_verification_vector(&mut storage, &mut events, 9, name, v, 5).unwrap();
        }
        tick_dkg(&mut storage, &mut events, &params, 9, 8).unwrap();

        let epoch = load_epoch(&storage, 9).unwrap();
        assert_eq!(epoch.phase, Phase::Completed);
        assert_eq!(
            epoch.valid_dealers,
            vec![true, true, true, false, false]
        );
    }

    #[test]
    fn tie_vote_is_invalid() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.i_total_slots = 100;
        params.dealing_phase_duration_blocks = 5;
        params.verification_phase_duration_blocks = 3;

        initiate_key_generation(&mut storage, &mut events, &params, 11, &participants(2), 0)
            .unwrap();
        let t = params.t_slots_degree() as usize;
        submit_dealer_part(
            &mut storage,
            &mut events,
            11,
            "p0",
            commitments(t, 1),
            vec![vec![], vec![]],
            0,
        )
        .unwrap();
        submit_dealer_part(
            &mut storage,
            &mut events,
            11,
            "p1",
            commitments(t, 2),
            vec![vec![], vec![]],
            0,
        )
        .unwrap();
        tick_dkg(&mut storage, &mut events, &params, 11, 5).unwrap();

        // each verifier approves exactly one of the two dealers
        submit_verification_vector(&mut storage, &mut events, 11, "p0", vec![true, false], 5)
            .unwrap();
        submit_verification_vector(&mut storage, &mut events, 11, "p1", vec![false, true], 5)
            .unwrap();
        tick_dkg(&mut storage, &mut events, &params, 11, 8).unwrap();

        let epoch = load_epoch(&storage, 11).unwrap();
        // both dealers' votes are 1-of-2: not strictly more than half.
        assert_eq!(epoch.valid_dealers, vec![false, false]);
        // the group public key is the identity (sum over zero valid dealers).
        assert_eq!(epoch.group_public_key, Some(G2Point::identity()));
    }

    #[test]
    fn tick_is_idempotent() {
        let mut storage = MemoryStorage::new();
        let mut events = RecordingEventSink::default();
        let mut params = Params::default();
        params.dealing_phase_duration_blocks = 5;
        initiate_key_generation(&mut storage, &mut events, &params, 3, &participants(2), 0)
            .unwrap();

        tick_dkg(&mut storage, &mut events, &params, 3, 5).unwrap();
        let after_first = load_epoch(&storage, 3).unwrap();
        tick_dkg(&mut storage, &mut events, &params, 3, 5).unwrap();
        let after_second = load_epoch(&storage, 3).unwrap();
        assert_eq!(after_first, after_second);
    }
}
