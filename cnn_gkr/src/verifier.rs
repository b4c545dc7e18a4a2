use ff_ext::ExtensionField;
use itertools::Itertools;
use multilinear_extensions::virtual_poly::{VPAuxInfo, eq_eval};
use rayon::prelude::*;
use std::marker::PhantomData;
use sumcheck::structs::IOPVerifierState as SumcheckVerifierState;
use tracing::instrument;
use transcript::Transcript;

use crate::{
    error::GkrError,
    predicate::{
        eq_at_index, ext_mle, fft_factor_eval, omega_squares, pool_claim_eval, powers,
        zero_block_point,
    },
    structs::{
        GateSource, GkrProof, LayerKind, LayerProof, LayeredCircuit, PointAndEval, PoolClaim,
        VerifierReport,
    },
};

fn aux_info<E: ExtensionField>(num_vars: usize, max_degree: usize) -> VPAuxInfo<E> {
    VPAuxInfo {
        max_degree,
        max_num_variables: num_vars,
        phantom: PhantomData,
    }
}

/// Verify a reduction proof against the circuit and the claimed output
/// values. Total for well-formed inputs: either accepts, or returns the
/// specific rejection reason. The returned claim about the input extension
/// still has to be checked against the commitment.
#[instrument(skip_all, name = "cnn_gkr::verify")]
pub fn verify<E: ExtensionField>(
    circuit: &LayeredCircuit<E>,
    outputs: &[E::BaseField],
    proof: &GkrProof<E>,
    transcript: &mut impl Transcript<E>,
) -> Result<(PointAndEval<E>, VerifierReport), GkrError> {
    circuit.validate()?;

    let last = circuit.layers.len() - 1;
    let out_layer = circuit.output_layer();
    if outputs.len() as u64 != out_layer.size {
        return Err(GkrError::ClaimDimensionMismatch {
            layer: last,
            expected: out_layer.size as usize,
            got: outputs.len(),
        });
    }
    if proof.layer_proofs.len() != last {
        return Err(GkrError::SumCheckInconsistent {
            layer: last,
            context: format!(
                "expected {} layer proofs, got {}",
                last,
                proof.layer_proofs.len()
            ),
        });
    }

    let mut state = IOPVerifierState {
        circuit,
        pool_claims: vec![],
        report: VerifierReport::default(),
    };

    transcript.append_field_elements(outputs);
    let r_out = transcript.sample_and_append_vec(b"output point", out_layer.bit_length);
    let mut padded = outputs.to_vec();
    padded.resize(1 << out_layer.bit_length, E::BaseField::ZERO);
    let out_eval = ext_mle::<E>(out_layer.bit_length, &padded).evaluate(&r_out);

    let mut pending = vec![PointAndEval::new(r_out, out_eval)];
    for (layer_proof, id) in proof.layer_proofs.iter().zip((1..=last).rev()) {
        pending = state.verify_layer(id, pending, layer_proof, transcript)?;
        state.report.layers += 1;
    }

    let input_claim = state.verify_input(pending, proof, transcript)?;
    let report = state.report;
    Ok((input_claim, report))
}

/// Verifier state of the backward reduction.
pub struct IOPVerifierState<'a, E: ExtensionField> {
    circuit: &'a LayeredCircuit<E>,
    pool_claims: Vec<PoolClaim<E>>,
    report: VerifierReport,
}

impl<'a, E: ExtensionField> IOPVerifierState<'a, E> {
    fn verify_layer(
        &mut self,
        id: usize,
        pending: Vec<PointAndEval<E>>,
        layer_proof: &LayerProof<E>,
        transcript: &mut impl Transcript<E>,
    ) -> Result<Vec<PointAndEval<E>>, GkrError> {
        let layer = &self.circuit.layers[id];
        for claim in &pending {
            if claim.point.len() != layer.bit_length {
                return Err(GkrError::ClaimDimensionMismatch {
                    layer: id,
                    expected: layer.bit_length,
                    got: claim.point.len(),
                });
            }
        }

        let mut claims = pending
            .into_iter()
            .map(|claim| (claim.point, claim.eval))
            .collect_vec();
        if layer.zero_start_id < layer.size {
            let rho =
                transcript.sample_and_append_vec(b"zero block point", layer.zero_block_bits());
            claims.push((zero_block_point(layer, &rho), E::ZERO));
            self.report.zero_claims += 1;
        }
        let alpha = transcript
            .sample_and_append_challenge(b"combine claims")
            .elements;
        let alpha_pows = powers(alpha, claims.len());
        let target = layer.merged_target(&claims, &alpha_pows);

        if layer.ty.is_transform() {
            self.verify_transform_layer(id, &claims, &alpha_pows, target, layer_proof, transcript)
        } else {
            self.verify_gate_layer(id, &claims, &alpha_pows, target, layer_proof, transcript)
        }
    }

    fn verify_transform_layer(
        &mut self,
        id: usize,
        claims: &[(Vec<E>, E)],
        alpha_pows: &[E],
        target: E,
        layer_proof: &LayerProof<E>,
        transcript: &mut impl Transcript<E>,
    ) -> Result<Vec<PointAndEval<E>>, GkrError> {
        let layer = &self.circuit.layers[id];
        let k = layer.fft_bit_length as usize;
        let mut omega = E::BaseField::two_adic_generator(k);
        if layer.ty == LayerKind::Ifft {
            omega = omega.inverse();
        }
        let squares = omega_squares::<E>(omega, k);

        let subclaim = SumcheckVerifierState::verify(
            target,
            &layer_proof.phase1,
            &aux_info(layer.bit_length, k + 2),
            transcript,
        )
        .map_err(|e| GkrError::SumCheckInconsistent {
            layer: id,
            context: format!("transform sumcheck: {e}"),
        })?;
        self.report.sumcheck_rounds += layer_proof.phase1.num_rounds();
        self.report.transform_layers += 1;

        let eval = layer_proof
            .phase1_evals
            .prev
            .ok_or_else(|| GkrError::SumCheckInconsistent {
                layer: id,
                context: "transform proof missing the previous-layer evaluation".into(),
            })?;
        transcript.append_field_element_ext(&eval);

        let rx = &subclaim.point;
        // the closed-form butterfly predicate, one O(k) factor at a time
        let predicate = claims
            .iter()
            .zip(alpha_pows)
            .map(|((point, _), alpha)| {
                let factors = (0..k)
                    .map(|s| fft_factor_eval(point[s], s, &squares, &rx[..k]))
                    .product::<E>();
                *alpha * eq_eval(&point[k..], &rx[k..]) * factors
            })
            .sum::<E>();
        if subclaim.expected_evaluation != predicate * eval {
            return Err(GkrError::SumCheckInconsistent {
                layer: id,
                context: "transform predicate does not match the final claim".into(),
            });
        }

        Ok(vec![PointAndEval::new(rx.clone(), eval)])
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_gate_layer(
        &mut self,
        id: usize,
        claims: &[(Vec<E>, E)],
        alpha_pows: &[E],
        target: E,
        layer_proof: &LayerProof<E>,
        transcript: &mut impl Transcript<E>,
    ) -> Result<Vec<PointAndEval<E>>, GkrError> {
        let layer = &self.circuit.layers[id];
        if !layer.need_phase2 && layer.max_bl_v != 0 {
            return Err(GkrError::InvalidTopology(format!(
                "layer {id}: max_bl_v must be zero without phase 2"
            )));
        }
        let inconsistent = |context: String| GkrError::SumCheckInconsistent {
            layer: id,
            context,
        };

        let use_prev_u = layer.bit_length_u[GateSource::Prev.index()] >= 0;
        let use_pool_u = layer.bit_length_u[GateSource::Input.index()] >= 0;
        let prev_bl_u = layer.bit_length_u[GateSource::Prev.index()].max(0) as usize;
        let pool_bl_u = layer.bit_length_u[GateSource::Input.index()].max(0) as usize;

        // ===== Phase 1 =====
        let subclaim1 = SumcheckVerifierState::verify(
            target,
            &layer_proof.phase1,
            &aux_info(layer.max_bl_u, 2),
            transcript,
        )
        .map_err(|e| inconsistent(format!("phase 1 sumcheck: {e}")))?;
        self.report.sumcheck_rounds += layer_proof.phase1.num_rounds();

        let evals1 = &layer_proof.phase1_evals;
        if evals1.prev.is_some() != use_prev_u || evals1.input.is_some() != use_pool_u {
            return Err(inconsistent(
                "phase 1 evaluations do not match the layer's provenances".into(),
            ));
        }
        for eval in evals1.prev.iter().chain(evals1.input.iter()) {
            transcript.append_field_element_ext(eval);
        }

        let rx = &subclaim1.point;
        let eq_r_at = |g: u64| -> E {
            claims
                .iter()
                .zip(alpha_pows)
                .map(|((point, _), alpha)| *alpha * eq_at_index(point, g))
                .sum()
        };
        let vu_of = |src: GateSource| -> E {
            match src {
                GateSource::Prev => evals1.prev.unwrap(),
                GateSource::Input => evals1.input.unwrap(),
            }
        };

        // the unary contribution at (r, rx), streamed from the gate list;
        // per-gate evaluation is independent, accumulate-then-merge
        let uni_part = layer
            .uni_gates
            .par_iter()
            .map(|gate| {
                E::from_base(self.circuit.selectors[gate.sc as usize])
                    * eq_r_at(gate.g)
                    * eq_at_index(rx, gate.u)
                    * vu_of(gate.src)
            })
            .sum::<E>();

        let mut next = vec![];
        if let Some(eval) = evals1.prev {
            next.push(PointAndEval::new(rx[..prev_bl_u].to_vec(), eval));
        }
        if let Some(eval) = evals1.input {
            self.pool_claims.push(PoolClaim {
                layer: id,
                point: rx[..pool_bl_u].to_vec(),
                eval,
            });
            self.report.pool_claims += 1;
        }

        if !layer.need_phase2 {
            if subclaim1.expected_evaluation != uni_part {
                return Err(inconsistent(
                    "unary predicate does not match the final claim".into(),
                ));
            }
            if layer_proof.phase2.is_some() || layer_proof.phase2_evals.is_some() {
                return Err(inconsistent("unexpected phase 2 proof".into()));
            }
            return Ok(next);
        }

        // ===== Phase 2 =====
        self.report.phase2_layers += 1;
        let use_prev_v = layer.bit_length_v[GateSource::Prev.index()] >= 0;
        let use_pool_v = layer.bit_length_v[GateSource::Input.index()] >= 0;
        let prev_bl_v = layer.bit_length_v[GateSource::Prev.index()].max(0) as usize;
        let pool_bl_v = layer.bit_length_v[GateSource::Input.index()].max(0) as usize;

        let phase2 = layer_proof
            .phase2
            .as_ref()
            .ok_or_else(|| inconsistent("missing phase 2 proof".into()))?;
        let evals2 = layer_proof
            .phase2_evals
            .as_ref()
            .ok_or_else(|| inconsistent("missing phase 2 evaluations".into()))?;

        let target2 = subclaim1.expected_evaluation - uni_part;
        let subclaim2 =
            SumcheckVerifierState::verify(target2, phase2, &aux_info(layer.max_bl_v, 2), transcript)
                .map_err(|e| inconsistent(format!("phase 2 sumcheck: {e}")))?;
        self.report.sumcheck_rounds += phase2.num_rounds();

        if evals2.prev.is_some() != use_prev_v || evals2.input.is_some() != use_pool_v {
            return Err(inconsistent(
                "phase 2 evaluations do not match the layer's provenances".into(),
            ));
        }
        for eval in evals2.prev.iter().chain(evals2.input.iter()) {
            transcript.append_field_element_ext(eval);
        }

        let ry = &subclaim2.point;
        let vv_of = |src: GateSource| -> E {
            match src {
                GateSource::Prev => evals2.prev.unwrap(),
                GateSource::Input => evals2.input.unwrap(),
            }
        };
        let bin_part = layer
            .bin_gates
            .par_iter()
            .map(|gate| {
                E::from_base(self.circuit.selectors[gate.sc as usize])
                    * eq_r_at(gate.g)
                    * eq_at_index(rx, gate.u)
                    * vu_of(gate.source_u())
                    * eq_at_index(ry, gate.v)
                    * vv_of(gate.source_v())
            })
            .sum::<E>();
        if subclaim2.expected_evaluation != bin_part {
            return Err(inconsistent(
                "binary predicate does not match the final claim".into(),
            ));
        }

        if let Some(eval) = evals2.prev {
            next.push(PointAndEval::new(ry[..prev_bl_v].to_vec(), eval));
        }
        if let Some(eval) = evals2.input {
            self.pool_claims.push(PoolClaim {
                layer: id,
                point: ry[..pool_bl_v].to_vec(),
                eval,
            });
            self.report.pool_claims += 1;
        }

        Ok(next)
    }

    fn verify_input(
        &mut self,
        pending: Vec<PointAndEval<E>>,
        proof: &GkrProof<E>,
        transcript: &mut impl Transcript<E>,
    ) -> Result<PointAndEval<E>, GkrError> {
        let input_bl = self.circuit.layers[0].bit_length;
        let mut direct = vec![];
        for claim in pending {
            if claim.point.len() != input_bl {
                return Err(GkrError::ClaimDimensionMismatch {
                    layer: 0,
                    expected: input_bl,
                    got: claim.point.len(),
                });
            }
            direct.push(claim);
        }

        // bit validity of the decomposition region
        if self.circuit.aux_range.start < self.circuit.aux_range.end {
            let bit_check = proof
                .input
                .bit_check
                .as_ref()
                .ok_or(GkrError::BitValidityFailure)?;
            let block_bits = self.circuit.aux_block_bits();
            let tau = transcript.sample_and_append_vec(b"bit check point", block_bits);

            let subclaim = SumcheckVerifierState::verify(
                E::ZERO,
                &bit_check.proof,
                &aux_info(block_bits, 3),
                transcript,
            )
            .map_err(|_| GkrError::BitValidityFailure)?;
            self.report.sumcheck_rounds += bit_check.proof.num_rounds();

            let block_eval = bit_check.block_eval;
            transcript.append_field_element_ext(&block_eval);
            let expected =
                eq_eval(&tau, &subclaim.point) * (block_eval - block_eval * block_eval);
            if subclaim.expected_evaluation != expected {
                return Err(GkrError::BitValidityFailure);
            }

            let addr = self.circuit.aux_range.start >> block_bits;
            let mut point = subclaim.point;
            for t in 0..input_bl - block_bits {
                point.push(E::from_bool((addr >> t) & 1 == 1));
            }
            direct.push(PointAndEval::new(point, block_eval));
        } else if proof.input.bit_check.is_some() {
            return Err(GkrError::BitValidityFailure);
        }

        // merge
        let gamma = transcript
            .sample_and_append_challenge(b"combine input claims")
            .elements;
        let gamma_pows = powers(gamma, direct.len() + self.pool_claims.len());
        let target = direct
            .iter()
            .map(|claim| claim.eval)
            .chain(self.pool_claims.iter().map(|claim| claim.eval))
            .zip(gamma_pows.iter())
            .map(|(eval, gamma)| eval * *gamma)
            .sum::<E>();

        let subclaim = SumcheckVerifierState::verify(
            target,
            &proof.input.merge,
            &aux_info(input_bl, 2),
            transcript,
        )
        .map_err(|e| GkrError::SumCheckInconsistent {
            layer: 0,
            context: format!("input merge sumcheck: {e}"),
        })?;
        self.report.sumcheck_rounds += proof.input.merge.num_rounds();

        let final_eval = proof.input.final_eval;
        transcript.append_field_element_ext(&final_eval);

        let rw = &subclaim.point;
        let predicate = direct
            .iter()
            .map(|claim| eq_eval(&claim.point, rw))
            .chain(self.pool_claims.iter().map(|claim| {
                pool_claim_eval(
                    &claim.point,
                    &self.circuit.layers[claim.layer].input_pool,
                    rw,
                )
            }))
            .zip(gamma_pows.iter())
            .map(|(p, gamma)| p * *gamma)
            .sum::<E>();
        if subclaim.expected_evaluation != predicate * final_eval {
            return Err(GkrError::SumCheckInconsistent {
                layer: 0,
                context: "input predicate does not match the final claim".into(),
            });
        }

        Ok(PointAndEval::new(rw.clone(), final_eval))
    }
}
