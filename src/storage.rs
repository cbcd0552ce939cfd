//! The storage façade: an ordered byte-keyed, byte-valued store
//! with prefix-range iteration, and the fixed key layouts built on top of it.
//!
//! Splitting a real/mock `Storage` impl mirrors how `multisig`'s `db` module
//! separates `db/persistent.rs` from `db/mock.rs`.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::CoreError;

pub trait Storage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    /// Iterates all entries whose key starts with `prefix`, in key order.
    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Internal(format!("encode failure: {e}")))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Internal(format!("decode failure: {e}")))
}

/// Reads and decodes a value, returning `Ok(None)` if absent.
pub fn get_decoded<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &[u8],
) -> Result<Option<T>, CoreError> {
    storage.get(key).map(|bytes| decode(&bytes)).transpose()
}

/// Encodes and writes a value.
pub fn put_encoded<T: Serialize>(
    storage: &mut dyn Storage,
    key: &[u8],
    value: &T,
) -> Result<(), CoreError> {
    let bytes = encode(value)?;
    storage.put(key, &bytes);
    Ok(())
}

const KEY_PARAMS: &[u8] = b"p_bls";
const KEY_ACTIVE_EPOCH_ID: &[u8] = b"active_epoch_id";
const PREFIX_EPOCH_BLS_DATA: &[u8] = b"epoch_bls_data";
const PREFIX_THRESHOLD_REQUEST: &[u8] = b"threshold_signing_request";
const PREFIX_EXPIRATION_INDEX: &[u8] = b"expiration_index";
const PREFIX_GROUP_VALIDATION: &[u8] = b"group_validation_";

pub fn key_params() -> Vec<u8> {
    KEY_PARAMS.to_vec()
}

pub fn key_active_epoch_id() -> Vec<u8> {
    KEY_ACTIVE_EPOCH_ID.to_vec()
}

pub fn key_epoch_dkg(epoch_id: u64) -> Vec<u8> {
    let mut k = PREFIX_EPOCH_BLS_DATA.to_vec();
    k.extend_from_slice(&epoch_id.to_be_bytes());
    k
}

pub fn key_threshold_request(request_id: &[u8]) -> Vec<u8> {
    let mut k = PREFIX_THRESHOLD_REQUEST.to_vec();
    k.extend_from_slice(request_id);
    k
}

pub fn key_expiration_index(deadline_block_height: u64, request_id: &[u8]) -> Vec<u8> {
    let mut k = PREFIX_EXPIRATION_INDEX.to_vec();
    k.extend_from_slice(&deadline_block_height.to_be_bytes());
    k.extend_from_slice(request_id);
    k
}

pub fn expiration_index_prefix_for_deadline(deadline_block_height: u64) -> Vec<u8> {
    let mut k = PREFIX_EXPIRATION_INDEX.to_vec();
    k.extend_from_slice(&deadline_block_height.to_be_bytes());
    k
}

/// The full `expiration_index` prefix, for scanning every pending deadline in
/// ascending order (big-endian deadline bytes sort numerically).
pub fn expiration_index_all_prefix() -> Vec<u8> {
    PREFIX_EXPIRATION_INDEX.to_vec()
}

pub fn key_group_validation(new_epoch_id: u64) -> Vec<u8> {
    let mut k = PREFIX_GROUP_VALIDATION.to_vec();
    k.extend_from_slice(new_epoch_id.to_string().as_bytes());
    k
}

/// Splits an `expiration_index` key back into `(deadline, request_id)`.
pub fn parse_expiration_index_key(key: &[u8]) -> Option<(u64, Vec<u8>)> {
    let rest = key.strip_prefix(PREFIX_EXPIRATION_INDEX)?;
    if rest.len() < 8 {
        return None;
    }
    let mut deadline_bytes = [0u8; 8];
    deadline_bytes.copy_from_slice(&rest[..8]);
    Some((u64::from_be_bytes(deadline_bytes), rest[8..].to_vec()))
}

/// In-memory `Storage` backed by a `BTreeMap`, used by the test suite and
/// analogous to `multisig`'s `db/mock.rs`.
#[derive(Default)]
pub struct MemoryStorage {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.get(key).cloned()
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.map.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        self.map.remove(key);
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
