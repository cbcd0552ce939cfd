//! Polynomial commitments on G2.

use crate::curve::{scalar_pow, G2Point};
use crate::error::CurveError;

/// Evaluates a dealer's committed polynomial `P(x) = Σ_{i=0..=t} xⁱ · Cᵢ` at
/// `slot_index`, returning the individual public-key contribution of that
/// dealer for that slot.
pub fn evaluate_commitment(commitments: &[G2Point], slot_index: u32) -> Result<G2Point, CurveError> {
    let mut acc = G2Point::identity();
    for (i, c) in commitments.iter().enumerate() {
        let term = c.mul_scalar(&scalar_pow(slot_index, i as u32))?;
        acc = acc.add(&term)?;
    }
    Ok(acc)
}

/// Aggregates a participant's individual public key as
/// `Σ_{valid dealers d} Σ_{slots x owned by the participant} P_d(x)`.
pub fn aggregate_individual_public_key(
    dealer_commitments: &[&[G2Point]],
    owned_slots: &[u32],
) -> Result<G2Point, CurveError> {
    let mut acc = G2Point::identity();
    for commitments in dealer_commitments {
        for &slot in owned_slots {
            let contribution = evaluate_commitment(commitments, slot)?;
            acc = acc.add(&contribution)?;
        }
    }
    Ok(acc)
}
