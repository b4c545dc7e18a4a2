use ff_ext::ExtensionField;

use crate::predicate::ext_mle;
use multilinear_extensions::util::ceil_log2;

/// The narrow contract the reduction engine has with an external polynomial
/// commitment scheme: commit to the input-layer table, open its multilinear
/// extension at the final reduction point, verify an opening. The core
/// never looks inside commitments.
pub trait PolynomialCommitment<E: ExtensionField> {
    type Commitment: Clone;
    type Proof: Clone;

    fn commit(&self, values: &[E::BaseField]) -> Self::Commitment;

    fn open(&self, values: &[E::BaseField], point: &[E]) -> (E, Self::Proof);

    fn verify(
        &self,
        commitment: &Self::Commitment,
        point: &[E],
        value: E,
        proof: &Self::Proof,
    ) -> bool;

    /// Field elements binding the commitment into the transcript.
    fn digest(&self, commitment: &Self::Commitment) -> Vec<E::BaseField>;
}

/// Transparent reference scheme: the "commitment" is the table itself and
/// openings are direct evaluations. Only suitable for tests and for
/// exercising the protocol without a real scheme.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferencePcs;

impl<E: ExtensionField> PolynomialCommitment<E> for ReferencePcs {
    type Commitment = Vec<E::BaseField>;
    type Proof = ();

    fn commit(&self, values: &[E::BaseField]) -> Self::Commitment {
        values.to_vec()
    }

    fn open(&self, values: &[E::BaseField], point: &[E]) -> (E, Self::Proof) {
        let num_vars = if values.len() <= 1 {
            0
        } else {
            ceil_log2(values.len())
        };
        debug_assert_eq!(values.len(), 1 << num_vars);
        (ext_mle::<E>(num_vars, values).evaluate(point), ())
    }

    fn verify(
        &self,
        commitment: &Self::Commitment,
        point: &[E],
        value: E,
        _proof: &Self::Proof,
    ) -> bool {
        let (expected, ()) = self.open(commitment, point);
        expected == value
    }

    fn digest(&self, commitment: &Self::Commitment) -> Vec<E::BaseField> {
        commitment.clone()
    }
}
