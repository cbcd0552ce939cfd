//! Data model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::curve::{G1Point, G2Point};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Dealing,
    Verifying,
    Completed,
    Signed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Dealing => "DEALING",
            Phase::Verifying => "VERIFYING",
            Phase::Completed => "COMPLETED",
            Phase::Signed => "SIGNED",
            Phase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    CollectingSignatures,
    Completed,
    Expired,
    Failed,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::CollectingSignatures => "COLLECTING_SIGNATURES",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Expired => "EXPIRED",
            RequestStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Epoch-scoped participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub address: String,
    /// Raw secp256k1 public key bytes, used only as an off-chain
    /// encryption/identity key for share delivery; never verified by the
    /// core.
    pub secp256k1_public_key: Vec<u8>,
    pub weight: f64,
    pub slot_start: u32,
    pub slot_end: u32,
}

impl Participant {
    pub fn slot_count(&self) -> u32 {
        self.slot_end - self.slot_start + 1
    }

    pub fn owns_slot(&self, slot: u32) -> bool {
        slot >= self.slot_start && slot <= self.slot_end
    }
}

/// A dealer's DKG contribution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DealerPart {
    pub dealer_address: String,
    /// `t+1` compressed G2 polynomial commitments, constant term first.
    pub commitments: Vec<G2Point>,
    /// One opaque encrypted-share blob per participant; never decrypted by
    /// the core, which only stores and forwards it.
    pub participant_shares: Vec<Vec<u8>>,
}

/// A participant's vote on every dealer's honesty. An empty vector
/// means "not yet submitted"; any nonempty vector is a submission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationSubmission {
    pub dealer_validity: Vec<bool>,
}

impl VerificationSubmission {
    pub fn is_submitted(&self) -> bool {
        !self.dealer_validity.is_empty()
    }
}

/// Per-epoch DKG record, keyed by `epoch_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochDkg {
    pub epoch_id: u64,
    pub i_total_slots: u32,
    pub t_slots_degree: u32,
    pub participants: Vec<Participant>,
    pub phase: Phase,
    pub dealing_deadline_block: u64,
    pub verifying_deadline_block: u64,
    /// One slot per participant index; `None` means "not yet submitted".
    pub dealer_parts: Vec<Option<DealerPart>>,
    /// One slot per participant index.
    pub verification_submissions: Vec<VerificationSubmission>,
    /// Populated at `Completed`: bit `i` is set iff participant `i` was
    /// deemed a valid dealer.
    pub valid_dealers: Vec<bool>,
    pub group_public_key: Option<G2Point>,
    pub validation_signature: Option<G1Point>,
}

impl EpochDkg {
    pub fn new(
        epoch_id: u64,
        i_total_slots: u32,
        t_slots_degree: u32,
        participants: Vec<Participant>,
        dealing_deadline_block: u64,
    ) -> Self {
        let n = participants.len();
        EpochDkg {
            epoch_id,
            i_total_slots,
            t_slots_degree,
            participants,
            phase: Phase::Dealing,
            dealing_deadline_block,
            verifying_deadline_block: 0,
            dealer_parts: vec![None; n],
            verification_submissions: vec![VerificationSubmission::default(); n],
            valid_dealers: vec![false; n],
            group_public_key: None,
            validation_signature: None,
        }
    }

    pub fn participant_index(&self, address: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.address == address)
    }
}

/// A threshold-signed partial contribution, submitted either against a
/// `ThresholdSigningRequest` or a `GroupKeyValidationState`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialSignature {
    pub participant_address: String,
    pub slot_indices: Vec<u32>,
    pub signature: G1Point,
}

/// A threshold signing request, keyed by `request_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSigningRequest {
    pub request_id: Vec<u8>,
    pub current_epoch_id: u64,
    pub chain_id: [u8; 32],
    pub data: Vec<[u8; 32]>,
    pub encoded_data: Vec<u8>,
    pub message_hash: [u8; 32],
    pub status: RequestStatus,
    pub partial_signatures: Vec<PartialSignature>,
    pub final_signature: Option<G1Point>,
    pub created_block_height: u64,
    pub deadline_block_height: u64,
}

impl ThresholdSigningRequest {
    pub fn has_submitted(&self, participant_address: &str) -> bool {
        self.partial_signatures
            .iter()
            .any(|p| p.participant_address == participant_address)
    }

    pub fn slots_covered(&self) -> u32 {
        self.partial_signatures
            .iter()
            .map(|p| p.slot_indices.len() as u32)
            .sum()
    }
}

/// Transient state tracking epoch-rollover group-key ratification,
/// discarded once `Signed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupKeyValidationState {
    pub new_epoch_id: u64,
    pub previous_epoch_id: u64,
    pub message_hash: [u8; 32],
    pub partial_signatures: Vec<PartialSignature>,
    pub slots_covered: u32,
}

impl GroupKeyValidationState {
    pub fn has_submitted(&self, participant_address: &str) -> bool {
        self.partial_signatures
            .iter()
            .any(|p| p.participant_address == participant_address)
    }
}
