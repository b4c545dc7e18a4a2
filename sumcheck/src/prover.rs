use std::sync::Arc;

use ff_ext::ExtensionField;
use multilinear_extensions::virtual_poly::VirtualPolynomial;
use rayon::prelude::*;
use transcript::{Challenge, Transcript};

use crate::{
    structs::{IOPProof, IOPProverMessage, IOPProverState},
    util::{AdditiveVec, extrapolate, extrapolation_aux},
};

impl<E: ExtensionField> IOPProverState<E> {
    /// Given a virtual polynomial, generate an IOP proof arguing for its sum
    /// over {0,1}^`num_vars`.
    #[tracing::instrument(skip_all, name = "sumcheck::prove", level = "trace")]
    pub fn prove(
        polynomial: VirtualPolynomial<E>,
        transcript: &mut impl Transcript<E>,
    ) -> (IOPProof<E>, IOPProverState<E>) {
        let (num_variables, max_degree) = (
            polynomial.aux_info.max_num_variables,
            polynomial.aux_info.max_degree,
        );

        // return empty proof when target polynomial is constant
        if num_variables == 0 {
            return (IOPProof::default(), Self::prover_init(polynomial));
        }

        transcript.append_message(&num_variables.to_le_bytes());
        transcript.append_message(&max_degree.to_le_bytes());

        let mut prover_state = Self::prover_init(polynomial);
        let mut challenge = None;
        let mut prover_msgs = Vec::with_capacity(num_variables);
        for _ in 0..num_variables {
            let prover_msg = prover_state.prove_round_and_update_state(&challenge);

            transcript.append_field_element_exts(&prover_msg.evaluations);
            prover_msgs.push(prover_msg);
            challenge = Some(transcript.sample_and_append_challenge(b"Internal round"));
        }

        // pushing the last challenge point to the state
        if let Some(p) = challenge {
            prover_state.challenges.push(p);
            // fix last challenge to collect final evaluation
            prover_state.fix_var(p.elements);
        };

        (
            IOPProof {
                point: prover_state
                    .challenges
                    .iter()
                    .map(|challenge| challenge.elements)
                    .collect(),
                proofs: prover_msgs,
            },
            prover_state,
        )
    }

    /// Initialize the prover state to argue for the sum of the input
    /// polynomial over {0,1}^`num_vars`.
    fn prover_init(polynomial: VirtualPolynomial<E>) -> Self {
        let max_degree = polynomial.aux_info.max_degree;
        Self {
            max_num_variables: polynomial.aux_info.max_num_variables,
            challenges: Vec::with_capacity(polynomial.aux_info.max_num_variables),
            round: 0,
            poly: polynomial,
            extrapolation_aux: extrapolation_aux(max_degree),
        }
    }

    /// Receive message from verifier, generate prover message, and proceed
    /// to next round.
    ///
    /// The round polynomial is reported by its evaluations at
    /// `0..=max_degree`; terms of smaller degree are extrapolated so that
    /// every message has the same shape.
    #[tracing::instrument(skip_all, name = "sumcheck::prove_round_and_update_state", level = "trace")]
    pub fn prove_round_and_update_state(
        &mut self,
        challenge: &Option<Challenge<E>>,
    ) -> IOPProverMessage<E> {
        assert!(
            self.round < self.max_num_variables,
            "prover is not active"
        );

        // Step 1:
        // fix argument and evaluate f(x) over x_m = r; where r is the
        // challenge for the current round, and m is the round number,
        // indexed from 1.
        if self.round == 0 {
            assert!(challenge.is_none(), "first round should be prover first.");
        } else {
            let chal = challenge.expect("verifier message is empty");
            self.challenges.push(chal);
            self.fix_var(chal.elements);
        }
        self.round += 1;

        // Step 2: generate sum for the partial evaluated polynomial:
        // f(r_1, ..., r_m, x_{m+1}, ..., x_n)
        let max_degree = self.poly.aux_info.max_degree;
        let num_pairs = 1usize << (self.max_num_variables - self.round);
        let AdditiveVec(products_sum) = self.poly.products.iter().fold(
            AdditiveVec::new(max_degree + 1),
            |mut products_sum, (coefficient, prod)| {
                let degree = prod.len();
                let polys = prod
                    .iter()
                    .map(|&i| &self.poly.flattened_ml_extensions[i])
                    .collect::<Vec<_>>();

                // For every remaining pair (x_m = 0, x_m = 1), each
                // multiplicand is linear in x_m; walk the evaluations at
                // t = 0..=degree by repeated addition of the slope.
                let mut sum = (0..num_pairs)
                    .into_par_iter()
                    .fold(
                        || {
                            (
                                AdditiveVec::new(degree + 1),
                                vec![E::ZERO; degree],
                                vec![E::ZERO; degree],
                            )
                        },
                        |(mut acc, mut vals, mut steps), b| {
                            for (j, poly) in polys.iter().enumerate() {
                                let low = poly.evaluations[b << 1];
                                let high = poly.evaluations[(b << 1) + 1];
                                vals[j] = low;
                                steps[j] = high - low;
                            }
                            acc[0] += vals.iter().copied().product::<E>();
                            for t in 1..=degree {
                                vals.iter_mut()
                                    .zip(steps.iter())
                                    .for_each(|(v, s)| *v += *s);
                                acc[t] += vals.iter().copied().product::<E>();
                            }
                            (acc, vals, steps)
                        },
                    )
                    .map(|(acc, _, _)| acc)
                    .reduce(|| AdditiveVec::new(degree + 1), |acc, item| acc + item)
                    .0;

                sum.iter_mut().for_each(|sum| *sum *= *coefficient);

                let extrapolation = (0..max_degree - degree)
                    .map(|i| {
                        let (points, weights) = &self.extrapolation_aux[degree - 1];
                        let at = E::from_u64((degree + 1 + i) as u64);
                        extrapolate(points, weights, &sum, &at)
                    })
                    .collect::<Vec<_>>();
                sum.extend(extrapolation);
                products_sum += AdditiveVec(sum);
                products_sum
            },
        );

        IOPProverMessage {
            evaluations: products_sum,
        }
    }

    /// Fix the lowest unbound variable of every multiplicand to `r`.
    pub fn fix_var(&mut self, r: E) {
        self.poly
            .flattened_ml_extensions
            .iter_mut()
            .for_each(|poly| {
                if let Some(f) = Arc::get_mut(poly) {
                    f.fix_variables_in_place(&[r]);
                } else {
                    *poly = Arc::new(poly.fix_variables(&[r]));
                }
            });
    }

    /// Collect the evaluation of each multiplicand at the fully bound point.
    pub fn get_mle_final_evaluations(&self) -> Vec<E> {
        self.poly
            .flattened_ml_extensions
            .iter()
            .map(|mle| {
                debug_assert_eq!(mle.num_vars(), 0);
                mle.evaluations[0]
            })
            .collect()
    }
}
