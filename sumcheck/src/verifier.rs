use ff_ext::ExtensionField;
use multilinear_extensions::virtual_poly::VPAuxInfo;
use transcript::Transcript;

use crate::{
    structs::{IOPProof, IOPVerifierState, SubClaim, VerifierError},
    util::{barycentric_weights, extrapolate},
};

impl<E: ExtensionField> IOPVerifierState<E> {
    /// Run the verifier side of a sum-check.
    ///
    /// Samples the same challenges as the prover, checks each round message
    /// against the running claim and returns the [`SubClaim`] that the
    /// virtual polynomial evaluates to `expected_evaluation` at `point` —
    /// a claim the caller still has to discharge.
    pub fn verify(
        claimed_sum: E,
        proof: &IOPProof<E>,
        aux_info: &VPAuxInfo<E>,
        transcript: &mut impl Transcript<E>,
    ) -> Result<SubClaim<E>, VerifierError<E>> {
        if aux_info.max_num_variables == 0 {
            return Ok(SubClaim {
                point: vec![],
                expected_evaluation: claimed_sum,
            });
        }

        transcript.append_message(&aux_info.max_num_variables.to_le_bytes());
        transcript.append_message(&aux_info.max_degree.to_le_bytes());

        if proof.proofs.len() != aux_info.max_num_variables {
            return Err(VerifierError::MalformedProof(format!(
                "expected {} round messages, got {}",
                aux_info.max_num_variables,
                proof.proofs.len()
            )));
        }

        let points = (0..1 + aux_info.max_degree as u64)
            .map(E::from_u64)
            .collect::<Vec<_>>();
        let weights = barycentric_weights(&points);

        let mut expected = claimed_sum;
        let mut point = Vec::with_capacity(aux_info.max_num_variables);
        for (round, prover_msg) in proof.proofs.iter().enumerate() {
            if prover_msg.evaluations.len() != aux_info.max_degree + 1 {
                return Err(VerifierError::MalformedProof(format!(
                    "round {} message has {} evaluations, expected {}",
                    round,
                    prover_msg.evaluations.len(),
                    aux_info.max_degree + 1
                )));
            }

            transcript.append_field_element_exts(&prover_msg.evaluations);
            let challenge = transcript.sample_and_append_challenge(b"Internal round");

            let got = prover_msg.evaluations[0] + prover_msg.evaluations[1];
            if got != expected {
                return Err(VerifierError::SumMismatch(round, expected, got));
            }

            expected = extrapolate(
                &points,
                &weights,
                &prover_msg.evaluations,
                &challenge.elements,
            );
            point.push(challenge.elements);
        }

        Ok(SubClaim {
            point,
            expected_evaluation: expected,
        })
    }
}
