//! BLS12-381 curve primitives.
//!
//! Public keys live in G2 (96-byte compressed), signatures in G1 (48-byte
//! compressed) — the "min-sig" BLS variant. Grounded on `blstrs`'s
//! `group`/`ff`/`pairing` trait surface, the same one
//! `aptos-dkg`'s weighted PVSS transcript code (`das/weighted_protocol.rs`)
//! builds on.

use std::ops::{Add, Mul};

use blstrs::{Bls12, G1Affine, G1Projective, G2Affine, G2Prepared, G2Projective, Gt, Scalar};
use ff::{Field, PrimeField};
use group::prime::PrimeCurveAffine;
use group::{Curve, Group};
use pairing::{MillerLoopResult, MultiMillerLoop};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use tiny_keccak::{Hasher, Keccak};

use crate::error::CurveError;

/// Number of trial hashes attempted by [`hash_to_g1`] before giving up.
pub const HASH_TO_CURVE_MAX_ATTEMPTS: u32 = 256;

/// keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

fn scalar_from_digest(bytes: &[u8; 32]) -> Option<Scalar> {
    let mut repr = <Scalar as PrimeField>::Repr::default();
    repr.as_mut().copy_from_slice(bytes);
    Option::from(Scalar::from_repr(repr))
}

/// A compressed G1 point (48 bytes): the signature group.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct G1Point(#[serde(with = "BigArray")] pub [u8; 48]);

/// A compressed G2 point (96 bytes): the public-key group.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct G2Point(#[serde(with = "BigArray")] pub [u8; 96]);

impl G1Point {
    pub fn identity() -> Self {
        G1Point(G1Affine::identity().to_compressed())
    }

    pub fn generator() -> Self {
        G1Point(G1Affine::generator().to_compressed())
    }

    pub fn to_affine(&self) -> Result<G1Affine, CurveError> {
        Option::from(G1Affine::from_compressed(&self.0)).ok_or(CurveError::InvalidG1Encoding)
    }

    fn from_projective(p: G1Projective) -> Self {
        G1Point(p.to_affine().to_compressed())
    }

    pub fn add(&self, other: &G1Point) -> Result<G1Point, CurveError> {
        let a = G1Projective::from(self.to_affine()?);
        let b = G1Projective::from(other.to_affine()?);
        Ok(Self::from_projective(a.add(b)))
    }

    pub fn mul_scalar(&self, scalar: &Scalar) -> Result<G1Point, CurveError> {
        let p = G1Projective::from(self.to_affine()?);
        Ok(Self::from_projective(p.mul(scalar)))
    }

    /// Sums a sequence of G1 points by point addition (aggregation / Σ Cᵢ).
    pub fn sum(points: impl IntoIterator<Item = G1Point>) -> Result<G1Point, CurveError> {
        let mut acc = G1Projective::identity();
        for p in points {
            acc = acc.add(G1Projective::from(p.to_affine()?));
        }
        Ok(Self::from_projective(acc))
    }
}

impl G2Point {
    pub fn identity() -> Self {
        G2Point(G2Affine::identity().to_compressed())
    }

    pub fn generator() -> Self {
        G2Point(G2Affine::generator().to_compressed())
    }

    pub fn to_affine(&self) -> Result<G2Affine, CurveError> {
        Option::from(G2Affine::from_compressed(&self.0)).ok_or(CurveError::InvalidG2Encoding)
    }

    fn from_projective(p: G2Projective) -> Self {
        G2Point(p.to_affine().to_compressed())
    }

    pub fn add(&self, other: &G2Point) -> Result<G2Point, CurveError> {
        let a = G2Projective::from(self.to_affine()?);
        let b = G2Projective::from(other.to_affine()?);
        Ok(Self::from_projective(a.add(b)))
    }

    pub fn mul_scalar(&self, scalar: &Scalar) -> Result<G2Point, CurveError> {
        let p = G2Projective::from(self.to_affine()?);
        Ok(Self::from_projective(p.mul(scalar)))
    }

    /// Sums a sequence of G2 points by point addition.
    pub fn sum(points: impl IntoIterator<Item = G2Point>) -> Result<G2Point, CurveError> {
        let mut acc = G2Projective::identity();
        for p in points {
            acc = acc.add(G2Projective::from(p.to_affine()?));
        }
        Ok(Self::from_projective(acc))
    }
}

/// Scalar exponentiation `base^power` in the BLS12-381 scalar field, used to
/// evaluate `x^i` when evaluating a committed polynomial.
pub fn scalar_pow(base: u32, power: u32) -> Scalar {
    let base = Scalar::from(base as u64);
    let mut acc = Scalar::ONE;
    for _ in 0..power {
        acc *= base;
    }
    acc
}

/// Hash `digest` to a point in G1.
///
/// The reference implementation this core is derived from does not use a
/// standard hash-to-curve random oracle (e.g. RFC 9380's
/// `BLS12381G1_XMD:SHA-256_SSWU_RO_`). Instead it hashes a counter-suffixed
/// digest with keccak-256, interprets the resulting 32 bytes as a scalar, and
/// multiplies the G1 generator by it, retrying with an incremented counter
/// whenever the candidate bytes do not form a canonical scalar or collapse to
/// the identity element. This is intentionally reproduced here for
/// byte-compatibility with that reference; it is not a secure random oracle
/// into G1 and should not be reused as a general-purpose hash-to-curve
/// routine.
pub fn hash_to_g1(digest: &[u8; 32]) -> Result<G1Point, CurveError> {
    let generator = G1Projective::generator();
    for counter in 0..HASH_TO_CURVE_MAX_ATTEMPTS {
        let mut preimage = Vec::with_capacity(36);
        preimage.extend_from_slice(digest);
        preimage.extend_from_slice(&counter.to_be_bytes());
        let candidate_bytes = keccak256(&preimage);
        if let Some(scalar) = scalar_from_digest(&candidate_bytes) {
            if scalar.is_zero_vartime() {
                continue;
            }
            let point = generator.mul(scalar);
            if !bool::from(point.is_identity()) {
                return Ok(G1Point(point.to_affine().to_compressed()));
            }
        }
    }
    Err(CurveError::HashToCurveExhausted(HASH_TO_CURVE_MAX_ATTEMPTS))
}

/// `e(g1, g2)`.
pub fn pairing(g1: &G1Affine, g2: &G2Affine) -> Gt {
    blstrs::pairing(g1, g2)
}

/// Multi-pairing: `Π e(g1_i, g2_i)`, computed as a single multi-Miller-loop
/// followed by one final exponentiation rather than per-pair final
/// exponentiations.
pub fn multi_pairing(terms: &[(G1Affine, G2Affine)]) -> Gt {
    let prepared: Vec<(G1Affine, G2Prepared)> = terms
        .iter()
        .map(|(g1, g2)| (*g1, G2Prepared::from(*g2)))
        .collect();
    let refs: Vec<(&G1Affine, &G2Prepared)> = prepared.iter().map(|(a, b)| (a, b)).collect();
    Bls12::multi_miller_loop(&refs).final_exponentiation()
}

/// BLS verification: checks `e(signature, g2_generator) == e(H(msg), pubkey)`
/// via a single multi-pairing (`e(signature, g2_gen) * e(H(msg), -pubkey) == 1`).
pub fn verify_bls(
    signature: &G1Point,
    pubkey: &G2Point,
    message_hash_point: &G1Point,
) -> Result<bool, CurveError> {
    let sig = signature.to_affine()?;
    let pk = pubkey.to_affine()?;
    let hm = message_hash_point.to_affine()?;
    let g2_gen = G2Affine::generator();
    let neg_pk = (-G2Projective::from(pk)).to_affine();
    let gt = multi_pairing(&[(sig, g2_gen), (hm, neg_pk)]);
    Ok(gt == Gt::identity())
}
