use std::sync::Arc;

use ff_ext::{FromUniformBytes, GoldilocksExt2};
use itertools::Itertools;
use multilinear_extensions::{
    mle::{ArcMultilinearExtension, DenseMultilinearExtension},
    virtual_poly::VirtualPolynomial,
};
use p3_field::PrimeCharacteristicRing;
use rand::{SeedableRng, rngs::StdRng};
use transcript::BasicTranscript;

use crate::structs::{IOPProverState, IOPVerifierState, VerifierError};

type E = GoldilocksExt2;

/// Sample a list of `degree` random MLEs together with the sum of their
/// product over the hypercube.
fn random_mle_list(
    nv: usize,
    degree: usize,
    rng: &mut StdRng,
) -> (Vec<ArcMultilinearExtension<E>>, E) {
    let mut multiplicands = Vec::with_capacity(degree);
    for _ in 0..degree {
        multiplicands.push(Vec::with_capacity(1 << nv))
    }
    let mut sum = E::ZERO;

    for _ in 0..(1 << nv) {
        let mut product = E::ONE;
        for e in multiplicands.iter_mut() {
            let val = E::random(&mut *rng);
            e.push(val);
            product *= val;
        }
        sum += product;
    }

    let list = multiplicands
        .into_iter()
        .map(|x| Arc::new(DenseMultilinearExtension::from_evaluations_vec(nv, x)))
        .collect_vec();
    (list, sum)
}

fn random_virtual_poly(
    nv: usize,
    num_products: usize,
    max_degree: usize,
    rng: &mut StdRng,
) -> (VirtualPolynomial<E>, E) {
    let mut poly = VirtualPolynomial::new(nv);
    let mut sum = E::ZERO;
    for i in 0..num_products {
        let degree = 1 + i % max_degree;
        let (product, product_sum) = random_mle_list(nv, degree, rng);
        let coefficient = E::random(&mut *rng);
        poly.add_mle_list(product, coefficient);
        sum += product_sum * coefficient;
    }
    (poly, sum)
}

fn run_roundtrip(nv: usize, num_products: usize, max_degree: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let (poly, claimed_sum) = random_virtual_poly(nv, num_products, max_degree, &mut rng);
    let aux_info = poly.aux_info.clone();

    let mut prover_transcript = BasicTranscript::<E>::new(b"sumcheck test");
    let (proof, state) = IOPProverState::prove(poly.clone(), &mut prover_transcript);

    let mut verifier_transcript = BasicTranscript::<E>::new(b"sumcheck test");
    let subclaim = IOPVerifierState::verify(claimed_sum, &proof, &aux_info, &mut verifier_transcript)
        .expect("verification failed");

    assert_eq!(subclaim.point, proof.point);
    assert_eq!(
        poly.evaluate(&subclaim.point),
        subclaim.expected_evaluation,
        "wrong subclaim"
    );
    // final per-multiplicand evaluations are consistent with the subclaim
    let final_evals = state.get_mle_final_evaluations();
    for (mle, eval) in poly.flattened_ml_extensions.iter().zip(final_evals) {
        assert_eq!(mle.evaluate(&subclaim.point), eval);
    }
}

#[test]
fn test_sumcheck_trivial_polynomial() {
    run_roundtrip(1, 1, 1, 11);
}

#[test]
fn test_sumcheck_normal_polynomial() {
    run_roundtrip(8, 5, 3, 12);
}

#[test]
fn test_sumcheck_high_degree_polynomial() {
    // the transform layers batch one term of degree fft_log_size + 2
    run_roundtrip(6, 2, 7, 13);
}

#[test]
fn test_sumcheck_rejects_wrong_sum() {
    let mut rng = StdRng::seed_from_u64(14);
    let (poly, claimed_sum) = random_virtual_poly(6, 3, 3, &mut rng);
    let aux_info = poly.aux_info.clone();

    let mut prover_transcript = BasicTranscript::<E>::new(b"sumcheck test");
    let (proof, _) = IOPProverState::prove(poly, &mut prover_transcript);

    let mut verifier_transcript = BasicTranscript::<E>::new(b"sumcheck test");
    let result = IOPVerifierState::verify(
        claimed_sum + E::ONE,
        &proof,
        &aux_info,
        &mut verifier_transcript,
    );
    assert!(matches!(result, Err(VerifierError::SumMismatch(0, _, _))));
}

#[test]
fn test_sumcheck_rejects_tampered_round_message() {
    let mut rng = StdRng::seed_from_u64(15);
    let (poly, claimed_sum) = random_virtual_poly(6, 3, 3, &mut rng);
    let aux_info = poly.aux_info.clone();

    let mut prover_transcript = BasicTranscript::<E>::new(b"sumcheck test");
    let (mut proof, _) = IOPProverState::prove(poly, &mut prover_transcript);
    proof.proofs[2].evaluations[1] += E::ONE;

    let mut verifier_transcript = BasicTranscript::<E>::new(b"sumcheck test");
    let result =
        IOPVerifierState::verify(claimed_sum, &proof, &aux_info, &mut verifier_transcript);
    assert!(result.is_err());
}
