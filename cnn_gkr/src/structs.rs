use std::ops::Range;

use ff_ext::ExtensionField;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use sumcheck::structs::IOPProof;

/// An evaluation point of a multilinear extension, low variable first.
pub type Point<E> = Vec<E>;

/// Id into the per-circuit selector table, resolved at build time.
pub type ScalarId = u32;

/// A point and the claimed evaluation of some multilinear extension at it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointAndEval<E> {
    pub point: Point<E>,
    pub eval: E,
}

impl<E: Clone> PointAndEval<E> {
    pub fn new(point: Point<E>, eval: E) -> Self {
        Self { point, eval }
    }

    pub fn new_from_ref(point: &Point<E>, eval: &E) -> Self {
        Self {
            point: point.clone(),
            eval: eval.clone(),
        }
    }
}

/// Where a gate operand is read from: the layer's window onto the committed
/// input pool (concrete inputs, model constants, decomposition bits), or the
/// immediately preceding layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateSource {
    Input = 0,
    Prev = 1,
}

impl GateSource {
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// Locality bit of the `u` operand of a binary gate: set when `u` is read
/// from the previous layer.
pub const U_FROM_PREV: u8 = 0b01;
/// Locality bit of the `v` operand of a binary gate.
pub const V_FROM_PREV: u8 = 0b10;

/// `out[g] += selector(sc) * in[u]`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct UniGate {
    pub g: u64,
    pub u: u64,
    pub src: GateSource,
    pub sc: ScalarId,
}

/// `out[g] += selector(sc) * in_u[u] * in_v[v]`, with the two operands
/// sourced independently according to the locality bits.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BinGate {
    pub g: u64,
    pub u: u64,
    pub v: u64,
    pub sc: ScalarId,
    pub locality: u8,
}

impl BinGate {
    pub fn source_u(&self) -> GateSource {
        if self.locality & U_FROM_PREV != 0 {
            GateSource::Prev
        } else {
            GateSource::Input
        }
    }

    pub fn source_v(&self) -> GateSource {
        if self.locality & V_FROM_PREV != 0 {
            GateSource::Prev
        } else {
            GateSource::Input
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum LayerKind {
    Input,
    Fft,
    Ifft,
    AddBias,
    Relu,
    Square,
    AvgPool,
    OptAvgPool,
    MaxPool,
    DotProd,
    Padding,
    FullyConnected,
    NormConv,
    NormConvMul,
    NormConvAdd,
}

impl LayerKind {
    /// Transform layers are verified through the closed-form butterfly
    /// predicate instead of an enumerated gate list.
    pub fn is_transform(&self) -> bool {
        matches!(self, LayerKind::Fft | LayerKind::Ifft)
    }
}

/// One layer of the circuit: a gate list of a declared kind plus the
/// size/bit-length metadata the reduction engine needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E::BaseField: Serialize",
    deserialize = "E::BaseField: serde::de::DeserializeOwned"
))]
pub struct Layer<E: ExtensionField> {
    pub ty: LayerKind,
    pub uni_gates: Vec<UniGate>,
    pub bin_gates: Vec<BinGate>,

    /// log2 of the layer's output domain.
    pub bit_length: usize,
    /// Number of used wires; wires in `[size, 1 << bit_length)` carry no
    /// gates and evaluate to zero.
    pub size: u64,

    /// Bit length of the two operand provenance domains, indexed by
    /// [`GateSource`]; -1 when a provenance is unused by this layer.
    pub bit_length_u: [i8; 2],
    pub bit_length_v: [i8; 2],
    /// Maxima over the provenances in use, recomputed by
    /// [`Layer::update_size`]; they size the sum-check rounds.
    pub max_bl_u: usize,
    pub max_bl_v: usize,

    pub need_phase2: bool,

    /// log2 of the transform length for `Fft`/`Ifft` layers, -1 otherwise.
    pub fft_bit_length: i8,

    /// Post-multiply applied to every output wire, exactly once
    /// (inverse-transform normalization, average pooling).
    pub scale: E::BaseField,

    /// First assertion wire. Wires in `[zero_start_id, size)` encode
    /// linearization constraints and must evaluate to zero, enforced by a
    /// dedicated zero claim over the aligned block they occupy.
    pub zero_start_id: u64,

    /// The layer's window onto the input pool: local index -> input-layer
    /// wire. Strictly increasing, which keeps intra-pool references acyclic
    /// by construction.
    pub input_pool: Vec<u64>,

    /// The contiguous block of decomposition wires this layer owns inside
    /// the input pool (`Relu`/`MaxPool` only).
    pub decomp_range: Option<Range<u64>>,

    /// Layout of the decomposition block, consumed by the wire-value
    /// provider when it fills the auxiliary witness.
    pub aux: Option<AuxLayout>,
}

/// How an activation layer's decomposition block is laid out.
///
/// `Relu`: per neuron, one sign bit followed by `magnitude_bits` magnitude
/// bits. `MaxPool`: per window, `window` selector bits followed by
/// `window * magnitude_bits` difference bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuxLayout {
    Relu {
        magnitude_bits: usize,
    },
    MaxPool {
        window: usize,
        magnitude_bits: usize,
    },
}

impl<E: ExtensionField> Layer<E> {
    pub fn new(ty: LayerKind, bit_length: usize, size: u64) -> Self {
        Self {
            ty,
            uni_gates: vec![],
            bin_gates: vec![],
            bit_length,
            size,
            bit_length_u: [-1, -1],
            bit_length_v: [-1, -1],
            max_bl_u: 0,
            max_bl_v: 0,
            need_phase2: false,
            fft_bit_length: -1,
            scale: <E::BaseField as p3_field::PrimeCharacteristicRing>::ONE,
            zero_start_id: size,
            input_pool: vec![],
            decomp_range: None,
            aux: None,
        }
    }

    /// Bit length of the pool provenance, when used.
    pub fn bl_of(&self, table: &[i8; 2], src: GateSource) -> Option<usize> {
        let bl = table[src.index()];
        (bl >= 0).then_some(bl as usize)
    }

    /// Number of assertion wires, if any.
    pub fn zero_block_len(&self) -> u64 {
        self.size - self.zero_start_id
    }

    /// Recompute the provenance bit lengths and their maxima from the gates
    /// actually present. Must be called after the last gate is added; the
    /// reduction engine checks `need_phase2 == false => max_bl_v == 0` as a
    /// precondition.
    pub fn update_size(&mut self, prev_bit_length: usize, pool_bit_length: usize) {
        let mut used_u = [false; 2];
        let mut used_v = [false; 2];
        for gate in &self.uni_gates {
            used_u[gate.src.index()] = true;
        }
        for gate in &self.bin_gates {
            used_u[gate.source_u().index()] = true;
            used_v[gate.source_v().index()] = true;
        }
        if self.ty.is_transform() {
            used_u[GateSource::Prev.index()] = true;
        }

        let domain = |used: bool, src: GateSource| -> i8 {
            if !used {
                return -1;
            }
            match src {
                GateSource::Input => pool_bit_length as i8,
                GateSource::Prev => prev_bit_length as i8,
            }
        };
        self.bit_length_u = [
            domain(used_u[0], GateSource::Input),
            domain(used_u[1], GateSource::Prev),
        ];
        self.bit_length_v = [
            domain(used_v[0], GateSource::Input),
            domain(used_v[1], GateSource::Prev),
        ];

        self.max_bl_u = self.bit_length_u.iter().copied().max().unwrap_or(-1).max(0) as usize;
        self.need_phase2 = !self.bin_gates.is_empty();
        self.max_bl_v = if self.need_phase2 {
            self.bit_length_v.iter().copied().max().unwrap_or(-1).max(0) as usize
        } else {
            0
        };
    }

    /// log2 of the aligned block holding the assertion wires.
    pub fn zero_block_bits(&self) -> usize {
        let len = self.zero_block_len();
        if len == 0 {
            0
        } else {
            multilinear_extensions::util::ceil_log2(len as usize)
        }
    }
}

/// An ordered sequence of layers (index 0 = input) representing the full
/// network, together with the tables gate selectors resolve against.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E::BaseField: Serialize",
    deserialize = "E::BaseField: serde::de::DeserializeOwned"
))]
pub struct LayeredCircuit<E: ExtensionField> {
    pub layers: Vec<Layer<E>>,
    /// Per-circuit selector table; gates store [`ScalarId`]s into it.
    pub selectors: Vec<E::BaseField>,
    /// Precomputed powers of two, used for decomposition weights.
    pub two_mul: Vec<E::BaseField>,

    /// Input-pool layout: wire 0 is the constant one, `[1, 1 + input_len)`
    /// holds the flattened input tensor, then the interned model constants,
    /// then the decomposition region.
    pub input_len: u64,
    /// Model constants occupying `[1 + input_len, 1 + input_len + len)`.
    pub model_constants: Vec<E::BaseField>,
    /// The region of the input pool holding every decomposition block; the
    /// bit-validity relation is sum-checked over the aligned block spanning
    /// it.
    pub aux_range: Range<u64>,
}

/// Per-inference wire values, prover-owned, recomputed for every input.
#[derive(Clone, Debug)]
pub struct CircuitWitness<E: ExtensionField> {
    /// `layers[i]` is padded to `1 << circuit.layers[i].bit_length`.
    pub layers: Vec<Vec<E::BaseField>>,
}

/// The evaluations of the two provenance polynomials a sum-check phase
/// leaves behind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: serde::de::DeserializeOwned"
))]
pub struct SourceEvals<E> {
    pub prev: Option<E>,
    pub input: Option<E>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: serde::de::DeserializeOwned"
))]
pub struct LayerProof<E> {
    pub phase1: IOPProof<E>,
    pub phase1_evals: SourceEvals<E>,
    pub phase2: Option<IOPProof<E>>,
    pub phase2_evals: Option<SourceEvals<E>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: serde::de::DeserializeOwned"
))]
pub struct BitCheckProof<E> {
    pub proof: IOPProof<E>,
    /// Claimed evaluation of the decomposition block polynomial at the
    /// bound point.
    pub block_eval: E,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: serde::de::DeserializeOwned"
))]
pub struct InputProof<E> {
    pub bit_check: Option<BitCheckProof<E>>,
    pub merge: IOPProof<E>,
    /// Claimed evaluation of the input layer at the merged point, the value
    /// the commitment is opened against.
    pub final_eval: E,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: serde::de::DeserializeOwned"
))]
pub struct GkrProof<E> {
    /// Layer proofs in reduction order, output layer first.
    pub layer_proofs: Vec<LayerProof<E>>,
    pub input: InputProof<E>,
}

/// A deferred claim against the input pool through some layer's alias
/// window, resolved by the input-pool argument.
#[derive(Clone, Debug)]
pub struct PoolClaim<E> {
    pub layer: usize,
    pub point: Point<E>,
    pub eval: E,
}

/// Statistics of a proving run, assembled by the caller; replaces any
/// process-global reporting state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverReport {
    pub layers: usize,
    pub sumcheck_rounds: usize,
    pub phase2_layers: usize,
    pub transform_layers: usize,
    pub zero_claims: usize,
    pub pool_claims: usize,
}

/// Statistics of a verification run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierReport {
    pub layers: usize,
    pub sumcheck_rounds: usize,
    pub phase2_layers: usize,
    pub transform_layers: usize,
    pub zero_claims: usize,
    pub pool_claims: usize,
}
