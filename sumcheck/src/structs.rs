use ff_ext::ExtensionField;
use multilinear_extensions::virtual_poly::VirtualPolynomial;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use transcript::Challenge;

/// An IOP proof is a list of messages from prover to verifier, one per
/// sum-check round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: serde::de::DeserializeOwned"
))]
pub struct IOPProof<E> {
    /// The challenge point bound by the rounds, low variable first.
    pub point: Vec<E>,
    pub proofs: Vec<IOPProverMessage<E>>,
}

impl<E> Default for IOPProof<E> {
    fn default() -> Self {
        Self {
            point: vec![],
            proofs: vec![],
        }
    }
}

impl<E> IOPProof<E> {
    pub fn num_rounds(&self) -> usize {
        self.proofs.len()
    }
}

/// A message from the prover to the verifier at a given round: the
/// evaluations of the round polynomial at `0..=max_degree`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize",
    deserialize = "E: serde::de::DeserializeOwned"
))]
pub struct IOPProverMessage<E> {
    pub evaluations: Vec<E>,
}

/// Prover state for a sum-check over one virtual polynomial.
pub struct IOPProverState<E: ExtensionField> {
    pub max_num_variables: usize,
    pub challenges: Vec<Challenge<E>>,
    pub round: usize,
    pub poly: VirtualPolynomial<E>,
    /// Barycentric points/weights per term degree, for extrapolating a
    /// degree-d round message to the batched maximum degree.
    pub(crate) extrapolation_aux: Vec<(Vec<E>, Vec<E>)>,
}

/// Verifier side of the protocol; round checks are performed as the
/// messages stream in, see [`IOPVerifierState::verify`].
pub struct IOPVerifierState<E: ExtensionField> {
    pub(crate) _marker: std::marker::PhantomData<E>,
}

/// The claim a completed sum-check leaves behind: the virtual polynomial is
/// expected to evaluate to `expected_evaluation` at `point`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubClaim<E> {
    pub point: Vec<E>,
    pub expected_evaluation: E,
}

#[derive(Clone, Debug, Error)]
pub enum VerifierError<E> {
    #[error("round {0} sum mismatch: expect: {1:?}, got: {2:?}")]
    SumMismatch(usize, E, E),
    #[error("malformed proof: {0}")]
    MalformedProof(String),
}
