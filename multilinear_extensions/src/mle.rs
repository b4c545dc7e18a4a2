use std::sync::Arc;

use ff_ext::ExtensionField;
use p3_field::Field;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub type ArcMultilinearExtension<F> = Arc<DenseMultilinearExtension<F>>;

/// Stores a multilinear polynomial in dense evaluation form.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseMultilinearExtension<F> {
    /// The evaluation over {0,1}^`num_vars`
    pub evaluations: Vec<F>,
    /// Number of variables
    pub num_vars: usize,
}

impl<F: Field> DenseMultilinearExtension<F> {
    /// Construct a new polynomial from a list of evaluations where the index
    /// represents a point in {0,1}^`num_vars` in little endian form. For
    /// example, `0b1011` represents `P(1,1,0,1)`
    pub fn from_evaluations_vec(num_vars: usize, evaluations: Vec<F>) -> Self {
        assert_eq!(
            evaluations.len(),
            1 << num_vars,
            "The size of evaluations should be 2^num_vars."
        );
        Self {
            num_vars,
            evaluations,
        }
    }

    pub fn from_evaluations_slice(num_vars: usize, evaluations: &[F]) -> Self {
        Self::from_evaluations_vec(num_vars, evaluations.to_vec())
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    /// Evaluate the MLE at a given point.
    pub fn evaluate(&self, point: &[F]) -> F {
        assert_eq!(
            self.num_vars,
            point.len(),
            "MLE size does not match the point"
        );
        let mut evals = self.evaluations.clone();
        let mut num_vars = self.num_vars;
        fix_low_variables_in_place(&mut evals, &mut num_vars, point);
        evals[0]
    }

    /// Reduce the number of variables of `self` by fixing the
    /// `partial_point.len()` lowest variables at `partial_point`.
    pub fn fix_variables(&self, partial_point: &[F]) -> DenseMultilinearExtension<F> {
        assert!(
            partial_point.len() <= self.num_vars,
            "invalid size of partial point"
        );
        let mut nv = self.num_vars;
        let mut poly = self.evaluations.clone();
        fix_low_variables_in_place(&mut poly, &mut nv, partial_point);
        Self::from_evaluations_vec(nv, poly)
    }

    /// In-place variant of [`Self::fix_variables`].
    pub fn fix_variables_in_place(&mut self, partial_point: &[F]) {
        assert!(
            partial_point.len() <= self.num_vars,
            "invalid size of partial point"
        );
        let mut nv = self.num_vars;
        fix_low_variables_in_place(&mut self.evaluations, &mut nv, partial_point);
        self.num_vars = nv;
    }
}

impl<F: Field> DenseMultilinearExtension<F> {
    /// Lift a base-field witness table into the extension field.
    pub fn to_ext_field<E: ExtensionField<BaseField = F>>(&self) -> DenseMultilinearExtension<E> {
        DenseMultilinearExtension::from_evaluations_vec(
            self.num_vars,
            self.evaluations.iter().map(|f| E::from_base(*f)).collect(),
        )
    }
}

pub fn fix_low_variables_in_place<F: Field>(
    slice: &mut Vec<F>,
    num_vars: &mut usize,
    partial_point: &[F],
) {
    assert!(
        partial_point.len() <= *num_vars,
        "invalid size of partial point"
    );
    for point in partial_point {
        fix_one_low_variable_in_place_helper(slice, num_vars, point);
    }
}

/// Helper function. Fix 1 variable.
fn fix_one_low_variable_in_place_helper<F: Field>(
    slice: &mut Vec<F>,
    num_vars: &mut usize,
    point: &F,
) {
    let new_length = 1 << (*num_vars - 1);
    slice
        .par_chunks_mut(2)
        .with_min_len(64)
        .for_each(|data| data[0] = *point * (data[1] - data[0]) + data[0]);

    for i in 1..new_length {
        slice[i] = slice[i * 2]
    }

    slice.truncate(new_length);
    *num_vars -= 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff_ext::{FromUniformBytes, GoldilocksExt2};
    use p3_field::PrimeCharacteristicRing;
    use rand::{SeedableRng, rngs::StdRng};

    type E = GoldilocksExt2;

    #[test]
    fn test_evaluate_on_hypercube_points() {
        let evals = (0..8).map(E::from_u64).collect::<Vec<_>>();
        let mle = DenseMultilinearExtension::from_evaluations_vec(3, evals.clone());
        for (i, expected) in evals.iter().enumerate() {
            let point = (0..3)
                .map(|b| E::from_u64(((i >> b) & 1) as u64))
                .collect::<Vec<_>>();
            assert_eq!(mle.evaluate(&point), *expected);
        }
    }

    #[test]
    fn test_fix_variables_matches_evaluate() {
        let mut rng = StdRng::seed_from_u64(42);
        let evals = (0..16).map(|_| E::random(&mut rng)).collect::<Vec<_>>();
        let mle = DenseMultilinearExtension::from_evaluations_vec(4, evals);
        let point = (0..4).map(|_| E::random(&mut rng)).collect::<Vec<_>>();

        let fixed = mle.fix_variables(&point[..2]);
        assert_eq!(fixed.num_vars(), 2);
        assert_eq!(fixed.evaluate(&point[2..]), mle.evaluate(&point));
    }
}
