use std::{cmp::max, collections::HashMap, marker::PhantomData, sync::Arc};

use ff_ext::ExtensionField;
use itertools::Itertools;
use p3_field::Field;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mle::{ArcMultilinearExtension, DenseMultilinearExtension};

/// A virtual polynomial is a sum of products of multilinear polynomials;
/// where the multilinear polynomials are stored via their multilinear
/// extensions: `(coefficient, MultilinearExtension)`
///
/// * Number of products n = `polynomial.products.len()`,
/// * Number of multiplicands of ith product m_i =
///   `polynomial.products[i].1.len()`,
/// * Coefficient of ith product c_i = `polynomial.products[i].0`
///
/// The resulting polynomial is
///
/// $$ \sum_{i=0}^{n} c_i \cdot \prod_{j=0}^{m_i} P_{ij} $$
#[derive(Default, Clone)]
pub struct VirtualPolynomial<E: ExtensionField> {
    /// Aux information about the multilinear polynomial
    pub aux_info: VPAuxInfo<E>,
    /// list of reference to products (as usize) of multilinear extension
    pub products: Vec<(E, Vec<usize>)>,
    /// Stores multilinear extensions in which product multiplicand can refer
    /// to.
    pub flattened_ml_extensions: Vec<ArcMultilinearExtension<E>>,
    /// Pointers to the above poly extensions
    raw_pointers_lookup_table: HashMap<usize, usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Auxiliary information about the multilinear polynomial
pub struct VPAuxInfo<E> {
    /// max number of multiplicands in each product
    pub max_degree: usize,
    /// number of variables of the polynomial
    pub max_num_variables: usize,
    /// Associated field
    #[doc(hidden)]
    pub phantom: PhantomData<E>,
}

impl<E: ExtensionField> VirtualPolynomial<E> {
    /// Creates an empty virtual polynomial with `max_num_variables`.
    pub fn new(max_num_variables: usize) -> Self {
        VirtualPolynomial {
            aux_info: VPAuxInfo {
                max_degree: 0,
                max_num_variables,
                phantom: PhantomData,
            },
            products: Vec::new(),
            flattened_ml_extensions: Vec::new(),
            raw_pointers_lookup_table: HashMap::new(),
        }
    }

    /// Creates a new virtual polynomial from a MLE and its coefficient.
    pub fn new_from_mle(mle: ArcMultilinearExtension<E>, coefficient: E) -> Self {
        let mut poly = VirtualPolynomial::new(mle.num_vars());
        poly.add_mle_list(vec![mle], coefficient);
        poly
    }

    /// Add a product of list of multilinear extensions to self.
    ///
    /// The MLEs will be multiplied together, and then multiplied by the
    /// scalar `coefficient`. Every MLE in the product must match the
    /// polynomial's number of variables; the same MLE may appear in several
    /// products (it is registered once, by pointer).
    pub fn add_mle_list(&mut self, mle_list: Vec<ArcMultilinearExtension<E>>, coefficient: E) {
        assert!(!mle_list.is_empty(), "input mle_list is empty");
        self.aux_info.max_degree = max(self.aux_info.max_degree, mle_list.len());

        let mut indexed_product = Vec::with_capacity(mle_list.len());
        for mle in mle_list {
            assert_eq!(
                mle.num_vars(),
                self.aux_info.max_num_variables,
                "product has a multiplicand with wrong number of variables {} vs {}",
                mle.num_vars(),
                self.aux_info.max_num_variables
            );

            let mle_ptr = Arc::as_ptr(&mle) as *const () as usize;
            if let Some(index) = self.raw_pointers_lookup_table.get(&mle_ptr) {
                indexed_product.push(*index);
            } else {
                let curr_index = self.flattened_ml_extensions.len();
                self.flattened_ml_extensions.push(mle);
                self.raw_pointers_lookup_table.insert(mle_ptr, curr_index);
                indexed_product.push(curr_index);
            }
        }
        self.products.push((coefficient, indexed_product));
    }

    /// Evaluate the virtual polynomial at point `point`.
    pub fn evaluate(&self, point: &[E]) -> E {
        assert_eq!(
            self.aux_info.max_num_variables,
            point.len(),
            "wrong number of variables {} vs {}",
            self.aux_info.max_num_variables,
            point.len()
        );

        let evals: Vec<E> = self
            .flattened_ml_extensions
            .iter()
            .map(|x| x.evaluate(point))
            .collect();

        self.products
            .iter()
            .map(|(c, p)| p.iter().map(|&i| evals[i]).product::<E>() * *c)
            .sum()
    }
}

/// Evaluate eq polynomial.
pub fn eq_eval<F: Field>(x: &[F], y: &[F]) -> F {
    assert_eq!(x.len(), y.len(), "x and y have different length");

    let mut res = F::ONE;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let xi_yi = xi * yi;
        res *= xi_yi + xi_yi - xi - yi + F::ONE;
    }
    res
}

/// This function builds the eq(x, r) polynomial for any given r, and outputs
/// the evaluation of eq(x, r) in its vector form.
///
/// Evaluate
///      eq(x,y) = \prod_i=1^num_var (x_i * y_i + (1-x_i)*(1-y_i))
/// over r, which is
///      eq(x,y) = \prod_i=1^num_var (x_i * r_i + (1-x_i)*(1-r_i))
pub fn build_eq_x_r_vec_sequential<E: ExtensionField>(r: &[E]) -> Vec<E> {
    // avoid unnecessary allocation
    if r.is_empty() {
        return vec![E::ONE];
    }
    // we build eq(x,r) from its evaluations
    // we want to evaluate eq(x,r) over x \in {0, 1}^num_vars
    // for example, with num_vars = 4, x is a binary vector of 4, then
    //  0 0 0 0 -> (1-r0)   * (1-r1)    * (1-r2)    * (1-r3)
    //  1 0 0 0 -> r0       * (1-r1)    * (1-r2)    * (1-r3)
    //  0 1 0 0 -> (1-r0)   * r1        * (1-r2)    * (1-r3)
    //  1 1 0 0 -> r0       * r1        * (1-r2)    * (1-r3)
    //  ....
    //  1 1 1 1 -> r0       * r1        * r2        * r3
    // we will need 2^num_var evaluations
    let mut evals = vec![E::ZERO; 1 << r.len()];
    build_eq_x_r_helper_sequential(r, &mut evals, E::ONE);
    evals
}

/// A helper function to build eq(x, r)*init via dynamic programming tricks.
/// This function takes 2^num_var iterations, and per iteration with 1
/// multiplication.
fn build_eq_x_r_helper_sequential<E: ExtensionField>(r: &[E], buf: &mut [E], init: E) {
    buf[0] = init;

    for (i, r) in r.iter().rev().enumerate() {
        let next_size = 1 << (i + 1);
        // suppose at the previous step we processed buf [0..size]
        // for the current step we are populating new buf[0..2*size]
        // for j traverse 0..size
        // buf[2*j + 1] = r * buf[j]
        // buf[2*j] = (1 - r) * buf[j]
        (0..next_size).step_by(2).rev().for_each(|index| {
            let prev_val = buf[index >> 1];
            let tmp = *r * prev_val;
            buf[index + 1] = tmp;
            buf[index] = prev_val - tmp;
        });
    }
}

/// Parallel version of [`build_eq_x_r_vec_sequential`]: each rayon chunk is
/// seeded with the eq value of its high bits and fills its low-bit slice
/// sequentially.
#[tracing::instrument(skip_all, name = "multilinear_extensions::build_eq_x_r_vec")]
pub fn build_eq_x_r_vec<E: ExtensionField>(r: &[E]) -> Vec<E> {
    let nthreads = rayon::current_num_threads().next_power_of_two();
    let nbits = nthreads.trailing_zeros() as usize;

    if r.len() < nbits + 1 {
        return build_eq_x_r_vec_sequential(r);
    }

    let eq_ts = build_eq_x_r_vec_sequential(&r[(r.len() - nbits)..]);
    let mut ret = vec![E::ZERO; 1 << r.len()];

    // eq(x, r) = eq(x_lo, r_lo) * eq(x_hi, r_hi)
    // where rlen = r.len(), x_lo = x[0..rlen-nbits], x_hi = x[rlen-nbits..]
    //  r_lo = r[0..rlen-nbits] and r_hi = r[rlen-nbits..]
    // each thread is associated with x_hi, and it will compute the subset
    // { eq(x_lo, r_lo) * eq(x_hi, r_hi) } whose cardinality equals to
    // 2^{rlen-nbits}
    ret.par_chunks_mut(1 << (r.len() - nbits))
        .zip((0..nthreads).into_par_iter())
        .for_each(|(chunks, tid)| {
            let eq_t = eq_ts[tid];
            build_eq_x_r_helper_sequential(&r[..(r.len() - nbits)], chunks, eq_t);
        });
    ret
}

/// This function builds the eq(x, r) polynomial for any given r.
pub fn build_eq_x_r<E: ExtensionField>(r: &[E]) -> ArcMultilinearExtension<E> {
    let evals = build_eq_x_r_vec(r);
    Arc::new(DenseMultilinearExtension::from_evaluations_vec(
        r.len(),
        evals,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::bit_decompose;
    use ff_ext::{FromUniformBytes, GoldilocksExt2};
    use p3_field::PrimeCharacteristicRing;
    use rand::{SeedableRng, rngs::StdRng};

    type E = GoldilocksExt2;

    fn eq_naive(r: &[E], idx: usize) -> E {
        let bits = bit_decompose(idx as u64, r.len());
        bits.iter()
            .zip(r.iter())
            .map(|(&b, &ri)| if b { ri } else { E::ONE - ri })
            .product()
    }

    #[test]
    fn test_build_eq_matches_naive() {
        let mut rng = StdRng::seed_from_u64(0);
        for num_vars in 1..8 {
            let r = (0..num_vars).map(|_| E::random(&mut rng)).collect_vec();
            let eq_seq = build_eq_x_r_vec_sequential(&r);
            let eq_par = build_eq_x_r_vec(&r);
            assert_eq!(eq_seq, eq_par);
            for (idx, val) in eq_seq.iter().enumerate() {
                assert_eq!(*val, eq_naive(&r, idx));
            }
        }
    }

    #[test]
    fn test_eq_eval_agrees_with_table() {
        let mut rng = StdRng::seed_from_u64(1);
        let r = (0..5).map(|_| E::random(&mut rng)).collect_vec();
        let table = build_eq_x_r_vec_sequential(&r);
        let mle = DenseMultilinearExtension::from_evaluations_vec(5, table);
        let x = (0..5).map(|_| E::random(&mut rng)).collect_vec();
        assert_eq!(mle.evaluate(&x), eq_eval(&x, &r));
    }

    #[test]
    fn test_virtual_poly_evaluate() {
        let mut rng = StdRng::seed_from_u64(2);
        let f = Arc::new(DenseMultilinearExtension::from_evaluations_vec(
            3,
            (0..8).map(|_| E::random(&mut rng)).collect(),
        ));
        let g = Arc::new(DenseMultilinearExtension::from_evaluations_vec(
            3,
            (0..8).map(|_| E::random(&mut rng)).collect(),
        ));
        let c = E::random(&mut rng);

        let mut poly = VirtualPolynomial::new(3);
        poly.add_mle_list(vec![f.clone(), g.clone()], c);
        poly.add_mle_list(vec![f.clone()], E::ONE);

        let point = (0..3).map(|_| E::random(&mut rng)).collect_vec();
        let expected = c * f.evaluate(&point) * g.evaluate(&point) + f.evaluate(&point);
        assert_eq!(poly.evaluate(&point), expected);
    }
}
