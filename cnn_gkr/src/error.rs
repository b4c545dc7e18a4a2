use thiserror::Error;

/// Error taxonomy of the circuit model and the reduction engine.
///
/// Construction-time errors (`InvalidTopology`) indicate a builder bug and
/// are fatal; proof-time inconsistencies are returned as specific rejection
/// reasons, so `verify` is total for dimension-consistent inputs.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GkrError {
    #[error("invalid circuit topology: {0}")]
    InvalidTopology(String),

    #[error("claim dimension mismatch at layer {layer}: expected {expected} variables, got {got}")]
    ClaimDimensionMismatch {
        layer: usize,
        expected: usize,
        got: usize,
    },

    #[error("sumcheck inconsistent at layer {layer}: {context}")]
    SumCheckInconsistent { layer: usize, context: String },

    #[error("bit validity check failed on the decomposition region")]
    BitValidityFailure,

    #[error("commitment opening failed")]
    CommitmentOpenFailure,
}
