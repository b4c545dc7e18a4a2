//! Arithmetization of convolutional / fully-connected network inference
//! into a layered circuit, and the sum-check reduction (GKR-style) walking
//! it: a prover convinces a verifier that claimed outputs follow from
//! committed inputs without the verifier re-executing the network.
//!
//! The circuit model lives in [`structs`]; forward evaluation (the
//! wire-value provider) in [`circuit`]; the backward reduction in
//! [`prover`] / [`verifier`]; network translation in [`builder`]. Field and
//! commitment backends stay behind the [`ff_ext`] traits and the
//! [`commitment::PolynomialCommitment`] seam.

#![deny(clippy::cargo)]

pub mod builder;
pub mod circuit;
pub mod commitment;
pub mod error;
pub mod predicate;
pub mod prover;
pub mod structs;
pub mod verifier;

#[cfg(test)]
mod test;

use ff_ext::ExtensionField;
use transcript::Transcript;

use crate::{
    commitment::PolynomialCommitment,
    error::GkrError,
    structs::{CircuitWitness, GkrProof, LayeredCircuit, ProverReport, VerifierReport},
};

/// A reduction proof bound to a commitment of the input layer, with the
/// final opening.
#[derive(Clone)]
pub struct CommittedGkrProof<E: ExtensionField, P: PolynomialCommitment<E>> {
    pub commitment: P::Commitment,
    pub proof: GkrProof<E>,
    pub opening: P::Proof,
}

/// Commit to the input pool, bind the commitment into the transcript, run
/// the backward reduction and open the commitment at the final claim.
pub fn prove_with_commitment<E: ExtensionField, P: PolynomialCommitment<E>>(
    circuit: &LayeredCircuit<E>,
    witness: &CircuitWitness<E>,
    pcs: &P,
    transcript: &mut impl Transcript<E>,
) -> Result<(CommittedGkrProof<E, P>, ProverReport), GkrError> {
    let commitment = pcs.commit(&witness.layers[0]);
    transcript.append_field_elements(&pcs.digest(&commitment));

    let (proof, report) = prover::prove(circuit, witness, transcript)?;
    let (_, opening) = pcs.open(&witness.layers[0], &proof.input.merge.point);

    Ok((
        CommittedGkrProof {
            commitment,
            proof,
            opening,
        },
        report,
    ))
}

/// Verify a committed proof end to end: the reduction down to the input
/// layer, then the commitment opening at the final claim.
pub fn verify_with_commitment<E: ExtensionField, P: PolynomialCommitment<E>>(
    circuit: &LayeredCircuit<E>,
    outputs: &[E::BaseField],
    committed: &CommittedGkrProof<E, P>,
    pcs: &P,
    transcript: &mut impl Transcript<E>,
) -> Result<VerifierReport, GkrError> {
    transcript.append_field_elements(&pcs.digest(&committed.commitment));

    let (input_claim, report) = verifier::verify(circuit, outputs, &committed.proof, transcript)?;

    if !pcs.verify(
        &committed.commitment,
        &input_claim.point,
        input_claim.eval,
        &committed.opening,
    ) {
        return Err(GkrError::CommitmentOpenFailure);
    }
    Ok(report)
}
