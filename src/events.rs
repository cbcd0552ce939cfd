//! Typed events and the sink they are emitted through.

use serde::{Deserialize, Serialize};

use crate::curve::{G1Point, G2Point};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    KeyGenerationInitiated {
        epoch_id: u64,
        i_total_slots: u32,
        t_slots_degree: u32,
        participants: Vec<String>,
    },
    DealerPartSubmitted {
        epoch_id: u64,
        dealer_address: String,
    },
    VerificationVectorSubmitted {
        epoch_id: u64,
        participant_address: String,
    },
    DkgFailed {
        epoch_id: u64,
        reason: String,
    },
    DkgCompleted {
        epoch_id: u64,
        group_public_key: G2Point,
    },
    GroupKeyValidated {
        new_epoch_id: u64,
        final_signature: G1Point,
    },
    ThresholdSigningRequested {
        request_id: Vec<u8>,
        current_epoch_id: u64,
        encoded_data: Vec<u8>,
        message_hash: [u8; 32],
        deadline_block_height: u64,
    },
    ThresholdSigningCompleted {
        request_id: Vec<u8>,
        current_epoch_id: u64,
        final_signature: G1Point,
        participating_slots: u32,
    },
    ThresholdSigningFailed {
        request_id: Vec<u8>,
        current_epoch_id: u64,
        reason: String,
    },
}

pub trait EventSink {
    fn emit(&mut self, event: Event);
}

/// `Vec`-backed sink for tests, analogous to `multisig`'s `db/mock.rs`
/// in-memory test doubles for its own external collaborators.
#[derive(Default)]
pub struct RecordingEventSink {
    pub events: Vec<Event>,
}

impl EventSink for RecordingEventSink {
    fn emit(&mut self, event: Event) {
        tracing::debug!(?event, "core event emitted");
        self.events.push(event);
    }
}
