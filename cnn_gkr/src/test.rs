use ff_ext::{FromUniformBytes, GoldilocksExt2};
use p3_field::{Field, PrimeCharacteristicRing, TwoAdicField};
use p3_goldilocks::Goldilocks;
use rand::{Rng, SeedableRng, rngs::StdRng};
use transcript::BasicTranscript;

use crate::{
    builder::{LayerSpec, Network},
    circuit::ntt_in_place,
    commitment::{PolynomialCommitment, ReferencePcs},
    error::GkrError,
    predicate::{ext_mle, fft_factor_eval, fft_factor_tables, omega_squares},
    prove_with_commitment,
    structs::{CircuitWitness, GateSource, LayeredCircuit, UniGate},
    verify_with_commitment,
};

type E = GoldilocksExt2;
type F = Goldilocks;

fn f(v: i64) -> F {
    if v >= 0 {
        F::from_u64(v as u64)
    } else {
        -F::from_u64((-v) as u64)
    }
}

fn roundtrip(
    circuit: &LayeredCircuit<E>,
    witness: &CircuitWitness<E>,
) -> Result<(), GkrError> {
    let pcs = ReferencePcs;
    let outputs = {
        let last = circuit.layers.len() - 1;
        witness.layers[last][..circuit.output_layer().size as usize].to_vec()
    };

    let mut prover_transcript = BasicTranscript::<E>::new(b"cnn_gkr test");
    let (committed, _report) =
        prove_with_commitment(circuit, witness, &pcs, &mut prover_transcript)?;

    let mut verifier_transcript = BasicTranscript::<E>::new(b"cnn_gkr test");
    verify_with_commitment(circuit, &outputs, &committed, &pcs, &mut verifier_transcript)
        .map(|_| ())
}

fn compile_and_run(
    network: &Network<F>,
    input: &[F],
) -> (LayeredCircuit<E>, CircuitWitness<E>) {
    let circuit = LayeredCircuit::<E>::compile(network).expect("compile failed");
    let witness = CircuitWitness::generate(&circuit, input).expect("witness failed");
    (circuit, witness)
}

fn real_outputs(circuit: &LayeredCircuit<E>, witness: &CircuitWitness<E>, n: usize) -> Vec<F> {
    let last = circuit.layers.len() - 1;
    witness.layers[last][..n].to_vec()
}

#[test]
fn test_ntt_matches_naive_dft() {
    let k = 3usize;
    let n = 1 << k;
    let omega = F::two_adic_generator(k);
    let mut rng = StdRng::seed_from_u64(21);
    let input = (0..n).map(|_| F::random(&mut rng)).collect::<Vec<_>>();

    let mut fast = input.clone();
    ntt_in_place(&mut fast, omega);

    for j in 0..n {
        let mut acc = F::ZERO;
        let mut w = F::ONE;
        let step = crate::circuit::pow_u64(omega, j as u64);
        for value in &input {
            acc += *value * w;
            w *= step;
        }
        assert_eq!(fast[j], acc, "output {j} disagrees with the naive DFT");
    }
}

#[test]
fn test_ntt_inverse_roundtrip() {
    let k = 4usize;
    let n = 1u64 << k;
    let omega = F::two_adic_generator(k);
    let mut rng = StdRng::seed_from_u64(22);
    let input = (0..n).map(|_| F::random(&mut rng)).collect::<Vec<_>>();

    let mut values = input.clone();
    ntt_in_place(&mut values, omega);
    ntt_in_place(&mut values, omega.inverse());
    let n_inv = F::from_u64(n).inverse();
    values.iter_mut().for_each(|v| *v *= n_inv);
    assert_eq!(values, input);
}

/// The butterfly factor tables agree with the transform on the hypercube
/// and with the closed-form evaluation at random points.
#[test]
fn test_transform_closed_form_predicate() {
    let k = 3usize;
    let n = 1usize << k;
    let omega = F::two_adic_generator(k);
    let mut rng = StdRng::seed_from_u64(23);
    let input = (0..n).map(|_| F::random(&mut rng)).collect::<Vec<_>>();
    let r = (0..k).map(|_| E::random(&mut rng)).collect::<Vec<_>>();

    let mut transformed = input.clone();
    ntt_in_place(&mut transformed, omega);
    let expected = ext_mle::<E>(k, &transformed).evaluate(&r);

    // sum over the hypercube of the factored predicate times the input
    let factors = fft_factor_tables::<E>(&r, omega, k);
    let got = (0..n)
        .map(|l| {
            factors
                .iter()
                .map(|f| f.evaluations[l])
                .product::<E>()
                * E::from_base(input[l])
        })
        .sum::<E>();
    assert_eq!(got, expected);

    // each factor's table extension matches its closed form
    let squares = omega_squares::<E>(omega, k);
    let x = (0..k).map(|_| E::random(&mut rng)).collect::<Vec<_>>();
    for (s, factor) in factors.iter().enumerate() {
        assert_eq!(factor.evaluate(&x), fft_factor_eval(r[s], s, &squares, &x));
    }
}

#[test]
fn test_add_bias_scenario() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::AddBias {
            bias: vec![f(1), f(2), f(3), f(4)],
        }],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(0), f(0), f(0), f(0)]);
    assert_eq!(
        real_outputs(&circuit, &witness, 4),
        vec![f(1), f(2), f(3), f(4)]
    );
    roundtrip(&circuit, &witness).expect("add-bias roundtrip rejected");
}

#[test]
fn test_avg_pool_scenario() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::AvgPool { window: 4 }],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(2), f(4), f(6), f(8)]);
    // scale = 1/4, applied exactly once
    assert_eq!(real_outputs(&circuit, &witness, 1), vec![f(5)]);
    roundtrip(&circuit, &witness).expect("avg-pool roundtrip rejected");
}

#[test]
fn test_max_pool_scenario() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::MaxPool {
            window: 4,
            magnitude_bits: 4,
        }],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(3), f(9), f(1), f(7)]);
    assert_eq!(real_outputs(&circuit, &witness, 1), vec![f(9)]);
    roundtrip(&circuit, &witness).expect("max-pool roundtrip rejected");
}

#[test]
fn test_relu_negative_inputs() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::Relu { magnitude_bits: 4 }],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(5), f(-3), f(0), f(-7)]);
    assert_eq!(
        real_outputs(&circuit, &witness, 4),
        vec![f(5), f(0), f(0), f(0)]
    );
    roundtrip(&circuit, &witness).expect("relu roundtrip rejected");
}

#[test]
fn test_square_and_opt_avg_pool() {
    let network = Network {
        input_len: 4,
        layers: vec![
            LayerSpec::Square,
            LayerSpec::OptAvgPool { window: 2, norm: 2 },
        ],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(1), f(3), f(2), f(4)]);
    // squares [1, 9, 4, 16], window sums [10, 20], divided by window * norm
    let quarter = F::from_u64(4).inverse();
    assert_eq!(
        real_outputs(&circuit, &witness, 2),
        vec![F::from_u64(10) * quarter, F::from_u64(20) * quarter]
    );
    roundtrip(&circuit, &witness).expect("square/opt-avg-pool roundtrip rejected");
}

#[test]
fn test_mlp_roundtrip() {
    // the fully-connected demo shape: x -> relu(Wx + b) -> W'x
    let network = Network {
        input_len: 4,
        layers: vec![
            LayerSpec::FullyConnected {
                weights: vec![
                    vec![f(1), f(-2), f(3), f(1)],
                    vec![f(0), f(1), f(-1), f(2)],
                    vec![f(2), f(0), f(1), f(-1)],
                    vec![f(-1), f(1), f(0), f(1)],
                ],
                bias: vec![f(1), f(-5), f(0), f(2)],
            },
            LayerSpec::Relu { magnitude_bits: 8 },
            LayerSpec::DotProd {
                weights: vec![vec![f(1), f(1), f(-1), f(2)], vec![f(3), f(0), f(1), f(0)]],
            },
        ],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(1), f(2), f(3), f(-1)]);

    // reference forward pass
    let x = [1i64, 2, 3, -1];
    let w = [[1i64, -2, 3, 1], [0, 1, -1, 2], [2, 0, 1, -1], [-1, 1, 0, 1]];
    let b = [1i64, -5, 0, 2];
    let mut hidden = [0i64; 4];
    for o in 0..4 {
        hidden[o] = (0..4).map(|i| w[o][i] * x[i]).sum::<i64>() + b[o];
        hidden[o] = hidden[o].max(0);
    }
    let w2 = [[1i64, 1, -1, 2], [3, 0, 1, 0]];
    let out: Vec<F> = (0..2)
        .map(|o| f((0..4).map(|i| w2[o][i] * hidden[i]).sum::<i64>()))
        .collect();
    assert_eq!(real_outputs(&circuit, &witness, 2), out);

    roundtrip(&circuit, &witness).expect("mlp roundtrip rejected");
}

#[test]
fn test_conv_fft_matches_direct() {
    let kernels = vec![
        vec![vec![f(1), f(2)], vec![f(-1), f(1)]],
        vec![vec![f(0), f(1)], vec![f(2), f(-2)]],
    ];
    let input = [f(1), f(2), f(3), f(4), f(-1), f(0), f(2), f(1)];

    let direct = Network {
        input_len: 8,
        layers: vec![LayerSpec::Conv1d {
            kernels: kernels.clone(),
            via_fft: false,
        }],
    };
    let fft = Network {
        input_len: 8,
        layers: vec![LayerSpec::Conv1d {
            kernels,
            via_fft: true,
        }],
    };

    let (direct_circuit, direct_witness) = compile_and_run(&direct, &input);
    let (fft_circuit, fft_witness) = compile_and_run(&fft, &input);

    // out_ch = 2, spatial output length = 3
    let direct_out = real_outputs(&direct_circuit, &direct_witness, 6);
    let fft_out = real_outputs(&fft_circuit, &fft_witness, 6);
    assert_eq!(direct_out, fft_out);

    roundtrip(&direct_circuit, &direct_witness).expect("direct conv roundtrip rejected");
    roundtrip(&fft_circuit, &fft_witness).expect("fft conv roundtrip rejected");
}

#[test]
fn test_mutated_wire_rejects() {
    let network = Network {
        input_len: 4,
        layers: vec![
            LayerSpec::FullyConnected {
                weights: vec![
                    vec![f(1), f(2), f(0), f(1)],
                    vec![f(0), f(1), f(1), f(1)],
                    vec![f(1), f(0), f(2), f(0)],
                    vec![f(1), f(1), f(0), f(2)],
                ],
                bias: vec![f(0), f(1), f(2), f(3)],
            },
            LayerSpec::Relu { magnitude_bits: 6 },
        ],
    };
    let (circuit, mut witness) = compile_and_run(&network, &[f(1), f(2), f(3), f(4)]);

    // flip one wire of an intermediate layer, leaving the input layer alone
    witness.layers[2][0] += F::ONE;

    let result = roundtrip(&circuit, &witness);
    assert!(
        matches!(result, Err(GkrError::SumCheckInconsistent { .. })),
        "expected SumCheckInconsistent, got {result:?}"
    );
}

#[test]
fn test_non_bit_decomposition_rejects() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::Relu { magnitude_bits: 3 }],
    };
    let (circuit, mut witness) = compile_and_run(&network, &[f(5), f(6), f(0), f(3)]);

    // neuron 0 has value 5 = 101b; re-encode its magnitude as 1 + 2*2 with a
    // non-binary digit. Every wiring identity still holds, only the
    // bit-validity relation is violated.
    let aux = circuit.aux_range.start as usize;
    assert_eq!(witness.layers[0][aux + 1], F::ONE); // b0
    witness.layers[0][aux + 2] = F::from_u64(2); // b1 := 2
    witness.layers[0][aux + 3] = F::ZERO; // b2 := 0

    let result = roundtrip(&circuit, &witness);
    assert!(
        matches!(result, Err(GkrError::BitValidityFailure)),
        "expected BitValidityFailure, got {result:?}"
    );
}

#[test]
fn test_wrong_output_rejects() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::AddBias {
            bias: vec![f(1), f(2), f(3), f(4)],
        }],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(1), f(1), f(1), f(1)]);

    let pcs = ReferencePcs;
    let mut prover_transcript = BasicTranscript::<E>::new(b"cnn_gkr test");
    let (committed, _) =
        prove_with_commitment(&circuit, &witness, &pcs, &mut prover_transcript).unwrap();

    let mut outputs =
        witness.layers[circuit.layers.len() - 1][..circuit.output_layer().size as usize].to_vec();
    outputs[1] += F::ONE;

    let mut verifier_transcript = BasicTranscript::<E>::new(b"cnn_gkr test");
    let result = verify_with_commitment(
        &circuit,
        &outputs,
        &committed,
        &pcs,
        &mut verifier_transcript,
    );
    assert!(matches!(
        result,
        Err(GkrError::SumCheckInconsistent { .. })
    ));
}

/// Adapter whose openings never verify: exercises the rejection path of the
/// commitment seam.
#[derive(Clone, Copy, Default)]
struct RejectingPcs;

impl PolynomialCommitment<E> for RejectingPcs {
    type Commitment = Vec<F>;
    type Proof = ();

    fn commit(&self, values: &[F]) -> Self::Commitment {
        values.to_vec()
    }

    fn open(&self, values: &[F], point: &[E]) -> (E, Self::Proof) {
        ReferencePcs.open(values, point)
    }

    fn verify(&self, _: &Self::Commitment, _: &[E], _: E, _: &Self::Proof) -> bool {
        false
    }

    fn digest(&self, commitment: &Self::Commitment) -> Vec<F> {
        commitment.clone()
    }
}

#[test]
fn test_failed_opening_rejects() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::Square],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(1), f(2), f(3), f(4)]);
    let outputs =
        witness.layers[circuit.layers.len() - 1][..circuit.output_layer().size as usize].to_vec();

    let pcs = RejectingPcs;
    let mut prover_transcript = BasicTranscript::<E>::new(b"cnn_gkr test");
    let (committed, _) =
        prove_with_commitment(&circuit, &witness, &pcs, &mut prover_transcript).unwrap();

    let mut verifier_transcript = BasicTranscript::<E>::new(b"cnn_gkr test");
    let result = verify_with_commitment(
        &circuit,
        &outputs,
        &committed,
        &pcs,
        &mut verifier_transcript,
    );
    assert!(matches!(result, Err(GkrError::CommitmentOpenFailure)));
}

#[test]
fn test_validate_rejects_out_of_range_gate() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::Square],
    };
    let mut circuit = LayeredCircuit::<E>::compile(&network).unwrap();
    let last = circuit.layers.len() - 1;
    circuit.layers[last].uni_gates.push(UniGate {
        g: circuit.layers[last].size,
        u: 0,
        src: GateSource::Prev,
        sc: 0,
    });
    assert!(matches!(
        circuit.validate(),
        Err(GkrError::InvalidTopology(_))
    ));
}

#[test]
fn test_validate_rejects_unsorted_alias_window() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::Relu { magnitude_bits: 3 }],
    };
    let mut circuit = LayeredCircuit::<E>::compile(&network).unwrap();
    let last = circuit.layers.len() - 1;
    circuit.layers[last].input_pool.swap(0, 1);
    assert!(matches!(
        circuit.validate(),
        Err(GkrError::InvalidTopology(_))
    ));
}

#[test]
fn test_validate_rejects_phase2_flag_mismatch() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::Square],
    };
    let mut circuit = LayeredCircuit::<E>::compile(&network).unwrap();
    let last = circuit.layers.len() - 1;
    circuit.layers[last].need_phase2 = false;
    circuit.layers[last].max_bl_v = 0;
    assert!(matches!(
        circuit.validate(),
        Err(GkrError::InvalidTopology(_))
    ));
}

#[test]
fn test_verify_rejects_wrong_output_arity() {
    let network = Network {
        input_len: 4,
        layers: vec![LayerSpec::Square],
    };
    let (circuit, witness) = compile_and_run(&network, &[f(1), f(2), f(3), f(4)]);

    let pcs = ReferencePcs;
    let mut prover_transcript = BasicTranscript::<E>::new(b"cnn_gkr test");
    let (committed, _) =
        prove_with_commitment(&circuit, &witness, &pcs, &mut prover_transcript).unwrap();

    let mut verifier_transcript = BasicTranscript::<E>::new(b"cnn_gkr test");
    let result = verify_with_commitment(
        &circuit,
        &[f(1)],
        &committed,
        &pcs,
        &mut verifier_transcript,
    );
    assert!(matches!(
        result,
        Err(GkrError::ClaimDimensionMismatch { .. })
    ));
}

#[test]
fn test_deep_random_mlp_roundtrip() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut rng = StdRng::seed_from_u64(7);
    let mut gen_row = |n: usize| (0..n).map(|_| f(rng.gen_range(-4..=4))).collect::<Vec<_>>();

    let mut layers = vec![];
    for _ in 0..3 {
        layers.push(LayerSpec::FullyConnected {
            weights: (0..8).map(|_| gen_row(8)).collect(),
            bias: gen_row(8),
        });
        layers.push(LayerSpec::Relu { magnitude_bits: 24 });
    }
    layers.push(LayerSpec::AvgPool { window: 2 });
    let network = Network {
        input_len: 8,
        layers,
    };

    let input = (0..8).map(|i| f(i - 3)).collect::<Vec<_>>();
    let (circuit, witness) = compile_and_run(&network, &input);
    roundtrip(&circuit, &witness).expect("deep mlp roundtrip rejected");
}
