//! Threshold signing engine.

use tracing::{info, warn};

use crate::curve::{self, verify_bls, G1Point};
use crate::dkg;
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventSink};
use crate::params::{quorum_threshold, Params};
use crate::poly;
use crate::state::{Phase, PartialSignature, RequestStatus, ThresholdSigningRequest};
use crate::storage::{self, Storage};

/// `abi.encodePacked`-style message encoding: `current_epoch_id(8B BE) ||
/// chain_id(32B) || data[0] || data[1] || ...`.
pub fn encode_request(current_epoch_id: u64, chain_id: &[u8; 32], data: &[[u8; 32]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 32 + 32 * data.len());
    buf.extend_from_slice(&current_epoch_id.to_be_bytes());
    buf.extend_from_slice(chain_id);
    for word in data {
        buf.extend_from_slice(word);
    }
    buf
}

fn load_request(storage: &dyn Storage, request_id: &[u8]) -> CoreResult<ThresholdSigningRequest> {
    storage::get_decoded(storage, &storage::key_threshold_request(request_id))?
        .ok_or_else(|| CoreError::NotFound(format!("request {} not found", hex::encode(request_id))))
}

fn save_request(storage: &mut dyn Storage, request: &ThresholdSigningRequest) -> CoreResult<()> {
    storage::put_encoded(storage, &storage::key_threshold_request(&request.request_id), request)
}

/// `RequestThresholdSignature`.
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
    if data.is_empty() {
        return Err(CoreError::InvalidArgument("data must be non-empty".into()));
    }
    if storage::get_decoded::<ThresholdSigningRequest>(
        storage,
        &storage::key_threshold_request(&request_id),
    )?
    .is_some()
    {
        return Err(CoreError::AlreadyExists(format!(
            "request {} already exists",
            hex::encode(&request_id)
        )));
    }
    let epoch = dkg::load_epoch(storage, current_epoch_id)?;
    if !matches!(epoch.phase, Phase::Completed | Phase::Signed) {
        return Err(CoreError::FailedPrecondition(format!(
            "epoch {current_epoch_id} has no established group key"
        )));
    }

    let encoded_data = encode_request(current_epoch_id, &chain_id, &data);
    let message_hash = curve::keccak256(&encoded_data);
    let deadline_block_height = current_block_height + params.signing_deadline_blocks;

    let request = ThresholdSigningRequest {
        request_id: request_id.clone(),
        current_epoch_id,
        chain_id,
        data,
        encoded_data: encoded_data.clone(),
        message_hash,
        status: RequestStatus::CollectingSignatures,
        partial_signatures: Vec::new(),
        final_signature: None,
        created_block_height: current_block_height,
        deadline_block_height,
    };
    save_request(storage, &request)?;
    storage::put_encoded(
        storage,
        &storage::key_expiration_index(deadline_block_height, &request_id),
        &request_id,
    )?;

    info!(request_id = %hex::encode(&request_id), current_epoch_id, "threshold signature requested");
    events.emit(Event::ThresholdSigningRequested {
        request_id,
        current_epoch_id,
        encoded_data,
        message_hash,
        deadline_block_height,
    });
    Ok(())
}

fn expire_request(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    mut request: ThresholdSigningRequest,
) -> CoreResult<()> {
    request.status = RequestStatus::Expired;
    let request_id = request.request_id.clone();
    let current_epoch_id = request.current_epoch_id;
    storage.delete(&storage::key_expiration_index(
        request.deadline_block_height,
        &request_id,
    ));
    save_request(storage, &request)?;

    warn!(request_id = %hex::encode(&request_id), "threshold signing request expired");
    events.emit(Event::ThresholdSigningFailed {
        request_id,
        current_epoch_id,
        reason: "deadline exceeded".into(),
    });
    Ok(())
}

/// `AddPartialSignature`. Deadlines are enforced eagerly here as well as
/// passively by [`tick_expirations`].
pub fn add_partial_signature(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    request_id: &[u8],
    participant_address: &str,
    slot_indices: Vec<u32>,
    signature: G1Point,
    current_block_height: u64,
) -> CoreResult<()> {
    let request = load_request(storage, request_id)?;
    if request.status != RequestStatus::CollectingSignatures {
        return Err(CoreError::FailedPrecondition(format!(
            "request {} is {}",
            hex::encode(request_id),
            request.status
        )));
    }
    if current_block_height > request.deadline_block_height {
        expire_request(storage, events, request)?;
        return Err(CoreError::DeadlineExceeded(
            "signing deadline has passed".into(),
        ));
    }
    if request.has_submitted(participant_address) {
        return Err(CoreError::AlreadyExists(format!(
            "{participant_address} already submitted a partial signature for this request"
        )));
    }

    let epoch = dkg::load_epoch(storage, request.current_epoch_id)?;
    let participant_index = epoch
        .participant_index(participant_address)
        .ok_or_else(|| {
            CoreError::PermissionDenied(format!(
                "{participant_address} is not a participant of epoch {}",
                request.current_epoch_id
            ))
        })?;
    let participant = &epoch.participants[participant_index];
    if slot_indices.is_empty() || !slot_indices.iter().all(|&s| participant.owns_slot(s)) {
        return Err(CoreError::PermissionDenied(
            "slot_indices must be a non-empty subset of the submitter's assigned slot range".into(),
        ));
    }

    let valid_dealer_commitments: Vec<&[crate::curve::G2Point]> = epoch
        .participants
        .iter()
        .enumerate()
        .filter(|(i, _)| epoch.valid_dealers[*i])
        .map(|(i, _)| {
            epoch.dealer_parts[i]
                .as_ref()
                .expect("valid dealer always submitted a part")
                .commitments
                .as_slice()
        })
        .collect();
    let individual_pubkey =
        poly::aggregate_individual_public_key(&valid_dealer_commitments, &slot_indices)?;
    let message_point = curve::hash_to_g1(&request.message_hash)?;
    if !verify_bls(&signature, &individual_pubkey, &message_point)? {
        return Err(CoreError::InvalidArgument(
            "partial signature failed pairing verification".into(),
        ));
    }

    let mut request = request;
    request.partial_signatures.push(PartialSignature {
        participant_address: participant_address.to_string(),
        slot_indices,
        signature,
    });
    let slots_covered = request.slots_covered();
    let quorum = quorum_threshold(epoch.i_total_slots);

    if slots_covered >= quorum {
        let final_signature = G1Point::sum(
            request
                .partial_signatures
                .iter()
                .map(|p| p.signature),
        )?;
        request.final_signature = Some(final_signature);
        request.status = RequestStatus::Completed;
        storage.delete(&storage::key_expiration_index(
            request.deadline_block_height,
            request_id,
        ));
        save_request(storage, &request)?;

        info!(request_id = %hex::encode(request_id), slots_covered, "threshold signature completed");
        events.emit(Event::ThresholdSigningCompleted {
            request_id: request_id.to_vec(),
            current_epoch_id: request.current_epoch_id,
            final_signature,
            participating_slots: slots_covered,
        });
    } else {
        save_request(storage, &request)?;
    }
    Ok(())
}

/// Passive deadline enforcement: scans the `expiration_index` from the earliest pending deadline,
/// stopping at the first deadline still in the future. Cost is proportional
/// to the number of requests actually expiring this block, not to the total
/// number pending.
pub fn tick_expirations(
    storage: &mut dyn Storage,
    events: &mut dyn EventSink,
    current_block_height: u64,
) -> CoreResult<()> {
    let entries = storage.prefix_iter(&storage::expiration_index_all_prefix());
    let mut expired_ids = Vec::new();
    for (key, _) in entries {
        let (deadline, request_id) = match storage::parse_expiration_index_key(&key) {
            Some(parsed) => parsed,
            None => continue,
        };
        if deadline > current_block_height {
            break;
        }
        expired_ids.push(request_id);
    }
    for request_id in expired_ids {
        match load_request(storage, &request_id) {
            Ok(request) if request.status == RequestStatus::CollectingSignatures => {
                expire_request(storage, events, request)?;
            }
            _ => {}
        }
    }
    Ok(())
}
