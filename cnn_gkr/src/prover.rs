use std::sync::Arc;

use ff_ext::ExtensionField;
use itertools::Itertools;
use multilinear_extensions::{
    mle::DenseMultilinearExtension,
    virtual_poly::{VirtualPolynomial, build_eq_x_r_vec},
};
use sumcheck::structs::IOPProverState as SumcheckProverState;
use tracing::instrument;
use transcript::Transcript;

use crate::{
    error::GkrError,
    predicate::{
        block_eq_table, ext_mle, fft_factor_tables, merged_eq_table, powers, tile_table,
        zero_block_point,
    },
    structs::{
        BitCheckProof, CircuitWitness, GateSource, GkrProof, InputProof, Layer, LayerKind,
        LayerProof, LayeredCircuit, PointAndEval, PoolClaim, ProverReport, SourceEvals,
    },
};

/// Prover state of the backward reduction: walks the circuit output to
/// input, turning each pending claim into claims about the predecessor
/// layer and deferring pool claims to the input argument.
pub struct IOPProverState<'a, E: ExtensionField> {
    circuit: &'a LayeredCircuit<E>,
    witness: &'a CircuitWitness<E>,
    pool_claims: Vec<PoolClaim<E>>,
    report: ProverReport,
}

/// Prove that the committed inputs and the circuit yield the output values
/// recorded in the witness. The claimed outputs are bound into the
/// transcript before any challenge is sampled.
#[instrument(skip_all, name = "cnn_gkr::prove")]
pub fn prove<E: ExtensionField>(
    circuit: &LayeredCircuit<E>,
    witness: &CircuitWitness<E>,
    transcript: &mut impl Transcript<E>,
) -> Result<(GkrProof<E>, ProverReport), GkrError> {
    circuit.validate()?;
    if witness.layers.len() != circuit.layers.len() {
        return Err(GkrError::InvalidTopology(
            "witness does not match the circuit".into(),
        ));
    }

    let mut state = IOPProverState {
        circuit,
        witness,
        pool_claims: vec![],
        report: ProverReport::default(),
    };

    let last = circuit.layers.len() - 1;
    let out_layer = circuit.output_layer();
    transcript.append_field_elements(&witness.layers[last][..out_layer.size as usize]);
    let r_out = transcript.sample_and_append_vec(b"output point", out_layer.bit_length);
    let out_eval = ext_mle::<E>(out_layer.bit_length, &witness.layers[last]).evaluate(&r_out);

    let mut pending = vec![PointAndEval::new(r_out, out_eval)];
    let mut layer_proofs = Vec::with_capacity(last);
    for id in (1..=last).rev() {
        let (proof, next) = state.reduce_layer(id, pending, transcript)?;
        layer_proofs.push(proof);
        pending = next;
        state.report.layers += 1;
    }

    let input = state.prove_input(pending, transcript)?;
    let report = state.report;
    Ok((GkrProof {
        layer_proofs,
        input,
    }, report))
}

impl<'a, E: ExtensionField> IOPProverState<'a, E> {
    /// Merge the pending claims on layer `id` and reduce them to claims on
    /// the predecessor, via the layer's wiring predicate.
    #[instrument(skip_all, name = "cnn_gkr::reduce_layer", fields(layer = id))]
    fn reduce_layer(
        &mut self,
        id: usize,
        pending: Vec<PointAndEval<E>>,
        transcript: &mut impl Transcript<E>,
    ) -> Result<(LayerProof<E>, Vec<PointAndEval<E>>), GkrError> {
        let layer = &self.circuit.layers[id];
        tracing::debug!(
            "reduce layer {id} ({}): {} pending claims",
            layer.ty,
            pending.len()
        );
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
            let rho = transcript.sample_and_append_vec(b"zero block point", layer.zero_block_bits());
            claims.push((zero_block_point(layer, &rho), E::ZERO));
            self.report.zero_claims += 1;
        }
        let alpha = transcript
            .sample_and_append_challenge(b"combine claims")
            .elements;
        let alpha_pows = powers(alpha, claims.len());

        if layer.ty.is_transform() {
            self.reduce_transform_layer(id, &claims, &alpha_pows, transcript)
        } else {
            self.reduce_gate_layer(id, &claims, &alpha_pows, transcript)
        }
    }

    /// Transform layers have no gate list: one sum-check against the
    /// closed-form butterfly predicate reduces every claim to a single
    /// evaluation of the previous layer.
    fn reduce_transform_layer(
        &mut self,
        id: usize,
        claims: &[(Vec<E>, E)],
        alpha_pows: &[E],
        transcript: &mut impl Transcript<E>,
    ) -> Result<(LayerProof<E>, Vec<PointAndEval<E>>), GkrError> {
        let layer = &self.circuit.layers[id];
        let k = layer.fft_bit_length as usize;
        let num_vars = layer.bit_length;
        let mut omega = E::BaseField::two_adic_generator(k);
        if layer.ty == LayerKind::Ifft {
            omega = omega.inverse();
        }

        let prev = Arc::new(ext_mle::<E>(num_vars, &self.witness.layers[id - 1]));
        let mut poly = VirtualPolynomial::new(num_vars);
        for ((point, _), alpha) in claims.iter().zip(alpha_pows) {
            let mut product = vec![Arc::new(DenseMultilinearExtension::from_evaluations_vec(
                num_vars,
                block_eq_table(&point[k..], k),
            ))];
            product.extend(fft_factor_tables(&point[..k], omega, num_vars));
            product.push(prev.clone());
            poly.add_mle_list(product, *alpha);
        }

        let (proof, sumcheck_state) = SumcheckProverState::prove(poly, transcript);
        self.report.sumcheck_rounds += proof.num_rounds();
        self.report.transform_layers += 1;

        // `prev` was registered first by the first claim's product, right
        // after its block table and k factor tables.
        let eval = sumcheck_state.get_mle_final_evaluations()[k + 1];
        transcript.append_field_element_ext(&eval);

        let point = proof.point.clone();
        let layer_proof = LayerProof {
            phase1: proof,
            phase1_evals: SourceEvals {
                prev: Some(eval),
                input: None,
            },
            phase2: None,
            phase2_evals: None,
        };
        Ok((layer_proof, vec![PointAndEval::new(point, eval)]))
    }

    /// The two-phase reduction over a gate layer's enumerated gate list.
    fn reduce_gate_layer(
        &mut self,
        id: usize,
        claims: &[(Vec<E>, E)],
        alpha_pows: &[E],
        transcript: &mut impl Transcript<E>,
    ) -> Result<(LayerProof<E>, Vec<PointAndEval<E>>), GkrError> {
        let layer = &self.circuit.layers[id];
        if !layer.need_phase2 && layer.max_bl_v != 0 {
            return Err(GkrError::InvalidTopology(format!(
                "layer {id}: max_bl_v must be zero without phase 2"
            )));
        }

        let eq_r = merged_eq_table(layer.bit_length, claims, alpha_pows);
        let selectors = &self.circuit.selectors;
        let prev_vals = &self.witness.layers[id - 1];
        let pool_vals = {
            let input = &self.witness.layers[0];
            layer
                .input_pool
                .iter()
                .map(|&wire| input[wire as usize])
                .collect_vec()
        };
        let fetch = |src: GateSource, idx: u64| -> E::BaseField {
            match src {
                GateSource::Prev => prev_vals[idx as usize],
                GateSource::Input => pool_vals[idx as usize],
            }
        };

        // ===== Phase 1: bind the u-operand domain =====
        //
        // f(x) = H_prev(x) * V_{i-1}(x) + H_pool(x) * A_i(x), streaming the
        // gate list once; binary gates absorb the concrete value of their v
        // operand.
        let nv1 = layer.max_bl_u;
        let use_prev_u = layer.bit_length_u[GateSource::Prev.index()] >= 0;
        let use_pool_u = layer.bit_length_u[GateSource::Input.index()] >= 0;
        let mut h_prev = use_prev_u.then(|| vec![E::ZERO; 1 << nv1]);
        let mut h_pool = use_pool_u.then(|| vec![E::ZERO; 1 << nv1]);

        {
            let mut add = |src: GateSource, u: u64, w: E| match src {
                GateSource::Prev => h_prev.as_mut().unwrap()[u as usize] += w,
                GateSource::Input => h_pool.as_mut().unwrap()[u as usize] += w,
            };
            for gate in &layer.uni_gates {
                let w = E::from_base(selectors[gate.sc as usize]) * eq_r[gate.g as usize];
                add(gate.src, gate.u, w);
            }
            for gate in &layer.bin_gates {
                let w = E::from_base(selectors[gate.sc as usize])
                    * eq_r[gate.g as usize]
                    * E::from_base(fetch(gate.source_v(), gate.v));
                add(gate.source_u(), gate.u, w);
            }
        }

        let prev_bl_u = layer.bit_length_u[GateSource::Prev.index()].max(0) as usize;
        let pool_bl_u = layer.bit_length_u[GateSource::Input.index()].max(0) as usize;
        let (phase1_proof, phase1_evals) =
            self.phase_sumcheck(nv1, h_prev, h_pool, pool_bl_u, prev_vals, &pool_vals, transcript);
        let rx = phase1_proof.point.clone();

        let mut next = vec![];
        if let Some(eval) = phase1_evals.prev {
            next.push(PointAndEval::new(rx[..prev_bl_u].to_vec(), eval));
        }
        if let Some(eval) = phase1_evals.input {
            self.pool_claims.push(PoolClaim {
                layer: id,
                point: rx[..pool_bl_u].to_vec(),
                eval,
            });
            self.report.pool_claims += 1;
        }

        if !layer.need_phase2 {
            let layer_proof = LayerProof {
                phase1: phase1_proof,
                phase1_evals,
                phase2: None,
                phase2_evals: None,
            };
            return Ok((layer_proof, next));
        }

        // ===== Phase 2: bind the v-operand domain =====
        //
        // g(y) = G_prev(y) * V_{i-1}(y) + G_pool(y) * A_i(y), with the
        // u factor of every binary gate fixed at rx and the phase-1 claims.
        self.report.phase2_layers += 1;
        let nv2 = layer.max_bl_v;
        let use_prev_v = layer.bit_length_v[GateSource::Prev.index()] >= 0;
        let use_pool_v = layer.bit_length_v[GateSource::Input.index()] >= 0;
        let mut g_prev = use_prev_v.then(|| vec![E::ZERO; 1 << nv2]);
        let mut g_pool = use_pool_v.then(|| vec![E::ZERO; 1 << nv2]);

        let eq_rx = build_eq_x_r_vec(&rx);
        for gate in &layer.bin_gates {
            let vu = match gate.source_u() {
                GateSource::Prev => phase1_evals.prev.unwrap(),
                GateSource::Input => phase1_evals.input.unwrap(),
            };
            let w = E::from_base(selectors[gate.sc as usize])
                * eq_r[gate.g as usize]
                * eq_rx[gate.u as usize]
                * vu;
            match gate.source_v() {
                GateSource::Prev => g_prev.as_mut().unwrap()[gate.v as usize] += w,
                GateSource::Input => g_pool.as_mut().unwrap()[gate.v as usize] += w,
            }
        }

        let prev_bl_v = layer.bit_length_v[GateSource::Prev.index()].max(0) as usize;
        let pool_bl_v = layer.bit_length_v[GateSource::Input.index()].max(0) as usize;
        let (phase2_proof, phase2_evals) =
            self.phase_sumcheck(nv2, g_prev, g_pool, pool_bl_v, prev_vals, &pool_vals, transcript);
        let ry = phase2_proof.point.clone();

        if let Some(eval) = phase2_evals.prev {
            next.push(PointAndEval::new(ry[..prev_bl_v].to_vec(), eval));
        }
        if let Some(eval) = phase2_evals.input {
            self.pool_claims.push(PoolClaim {
                layer: id,
                point: ry[..pool_bl_v].to_vec(),
                eval,
            });
            self.report.pool_claims += 1;
        }

        let layer_proof = LayerProof {
            phase1: phase1_proof,
            phase1_evals,
            phase2: Some(phase2_proof),
            phase2_evals: Some(phase2_evals),
        };
        Ok((layer_proof, next))
    }

    /// One phase of the gate-layer reduction: sum-check the predicate
    /// tables against the tiled provenance polynomials, collect the final
    /// source evaluations and bind them into the transcript.
    #[allow(clippy::too_many_arguments)]
    fn phase_sumcheck(
        &mut self,
        num_vars: usize,
        h_prev: Option<Vec<E>>,
        h_pool: Option<Vec<E>>,
        pool_bl: usize,
        prev_vals: &[E::BaseField],
        pool_vals: &[E::BaseField],
        transcript: &mut impl Transcript<E>,
    ) -> (sumcheck::structs::IOPProof<E>, SourceEvals<E>) {
        let mut poly = VirtualPolynomial::new(num_vars);
        let mut prev_index = None;
        let mut pool_index = None;
        let mut registered = 0usize;

        if let Some(h) = h_prev {
            let source = Arc::new(DenseMultilinearExtension::from_evaluations_vec(
                num_vars,
                tile_table(
                    &prev_vals.iter().map(|v| E::from_base(*v)).collect_vec(),
                    num_vars,
                ),
            ));
            poly.add_mle_list(
                vec![
                    Arc::new(DenseMultilinearExtension::from_evaluations_vec(num_vars, h)),
                    source,
                ],
                E::ONE,
            );
            prev_index = Some(registered + 1);
            registered += 2;
        }
        if let Some(h) = h_pool {
            let mut padded = pool_vals.iter().map(|v| E::from_base(*v)).collect_vec();
            padded.resize(1 << pool_bl, E::ZERO);
            let source = Arc::new(DenseMultilinearExtension::from_evaluations_vec(
                num_vars,
                tile_table(&padded, num_vars),
            ));
            poly.add_mle_list(
                vec![
                    Arc::new(DenseMultilinearExtension::from_evaluations_vec(num_vars, h)),
                    source,
                ],
                E::ONE,
            );
            pool_index = Some(registered + 1);
        }

        let (proof, state) = SumcheckProverState::prove(poly, transcript);
        self.report.sumcheck_rounds += proof.num_rounds();

        let finals = state.get_mle_final_evaluations();
        let evals = SourceEvals {
            prev: prev_index.map(|i| finals[i]),
            input: pool_index.map(|i| finals[i]),
        };
        if let Some(eval) = &evals.prev {
            transcript.append_field_element_ext(eval);
        }
        if let Some(eval) = &evals.input {
            transcript.append_field_element_ext(eval);
        }
        (proof, evals)
    }

    /// Discharge everything still pointing at the input layer: the
    /// bit-validity zerocheck over the decomposition region, then one merge
    /// sum-check reducing all direct and pool claims to a single evaluation
    /// of the input extension.
    fn prove_input(
        &mut self,
        pending: Vec<PointAndEval<E>>,
        transcript: &mut impl Transcript<E>,
    ) -> Result<InputProof<E>, GkrError> {
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
        let input_vals = &self.witness.layers[0];

        // bit validity: eq(tau, w) * B(w) * (1 - B(w)) sums to zero over the
        // aligned decomposition block
        let bit_check = if self.circuit.aux_range.start < self.circuit.aux_range.end {
            let block_bits = self.circuit.aux_block_bits();
            let tau = transcript.sample_and_append_vec(b"bit check point", block_bits);
            let start = self.circuit.aux_range.start as usize;
            let block = Arc::new(ext_mle::<E>(
                block_bits,
                &input_vals[start..start + (1 << block_bits)],
            ));
            let eq_tau = Arc::new(DenseMultilinearExtension::from_evaluations_vec(
                block_bits,
                build_eq_x_r_vec(&tau),
            ));

            let mut poly = VirtualPolynomial::new(block_bits);
            poly.add_mle_list(vec![eq_tau.clone(), block.clone()], E::ONE);
            poly.add_mle_list(vec![eq_tau, block.clone(), block], -E::ONE);

            let (proof, state) = SumcheckProverState::prove(poly, transcript);
            self.report.sumcheck_rounds += proof.num_rounds();
            let block_eval = state.get_mle_final_evaluations()[1];
            transcript.append_field_element_ext(&block_eval);

            // the block polynomial is the input extension with its high
            // variables pinned to the block address
            let addr = self.circuit.aux_range.start >> block_bits;
            let mut point = proof.point.clone();
            for t in 0..input_bl - block_bits {
                point.push(E::from_bool((addr >> t) & 1 == 1));
            }
            direct.push(PointAndEval::new(point, block_eval));

            Some(BitCheckProof { proof, block_eval })
        } else {
            None
        };

        // merge every claim into one evaluation of the input layer
        let gamma = transcript
            .sample_and_append_challenge(b"combine input claims")
            .elements;
        let gamma_pows = powers(gamma, direct.len() + self.pool_claims.len());

        let mut predicate = vec![E::ZERO; 1 << input_bl];
        let mut coeffs = gamma_pows.iter();
        for claim in &direct {
            let coeff = *coeffs.next().unwrap();
            let eq = build_eq_x_r_vec(&claim.point);
            predicate
                .iter_mut()
                .zip(eq)
                .for_each(|(acc, e)| *acc += coeff * e);
        }
        for pool_claim in &self.pool_claims {
            let coeff = *coeffs.next().unwrap();
            crate::predicate::scatter_pool_claim(
                &mut predicate,
                coeff,
                &pool_claim.point,
                &self.circuit.layers[pool_claim.layer].input_pool,
            );
        }

        let mut poly = VirtualPolynomial::new(input_bl);
        poly.add_mle_list(
            vec![
                Arc::new(DenseMultilinearExtension::from_evaluations_vec(
                    input_bl, predicate,
                )),
                Arc::new(ext_mle::<E>(input_bl, input_vals)),
            ],
            E::ONE,
        );
        let (merge, state) = SumcheckProverState::prove(poly, transcript);
        self.report.sumcheck_rounds += merge.num_rounds();
        let final_eval = state.get_mle_final_evaluations()[1];
        transcript.append_field_element_ext(&final_eval);

        Ok(InputProof {
            bit_check,
            merge,
            final_eval,
        })
    }
}

impl<E: ExtensionField> Layer<E> {
    /// The sum-check target of a layer's merged claims: the post-multiply
    /// is divided out once.
    pub fn merged_target(&self, claims: &[(Vec<E>, E)], alpha_pows: &[E]) -> E {
        let scale_inv = E::from_base(self.scale).inverse();
        claims
            .iter()
            .zip(alpha_pows)
            .map(|((_, eval), alpha)| *alpha * *eval)
            .sum::<E>()
            * scale_inv
    }
}
