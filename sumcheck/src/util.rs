use std::{
    cmp::max,
    ops::{Add, AddAssign, Deref, DerefMut, MulAssign},
};

use p3_field::{Field, PrimeCharacteristicRing};
use rayon::{prelude::ParallelIterator, slice::ParallelSliceMut};

pub fn barycentric_weights<F: Field>(points: &[F]) -> Vec<F> {
    let mut weights = points
        .iter()
        .enumerate()
        .map(|(j, point_j)| {
            points
                .iter()
                .enumerate()
                .filter(|&(i, _)| (i != j))
                .map(|(_, point_i)| *point_j - *point_i)
                .reduce(|acc, value| acc * value)
                .unwrap_or(F::ONE)
        })
        .collect::<Vec<_>>();
    batch_inversion(&mut weights);
    weights
}

// Computes the inverse of each field element in a vector {v_i} using a parallelized batch inversion.
pub fn batch_inversion<F: Field>(v: &mut [F]) {
    batch_inversion_and_mul(v, &F::ONE);
}

// Computes the inverse of each field element in a vector {v_i} sequentially (serial version).
pub fn serial_batch_inversion<F: Field>(v: &mut [F]) {
    serial_batch_inversion_and_mul(v, &F::ONE)
}

// Given a vector of field elements {v_i}, compute the vector {coeff * v_i^(-1)}
pub fn batch_inversion_and_mul<F: Field>(v: &mut [F], coeff: &F) {
    // Divide the vector v evenly between all available cores
    let min_elements_per_thread = 1;
    let num_cpus_available = rayon::current_num_threads();
    let num_elems = v.len();
    let num_elem_per_thread = max(num_elems / num_cpus_available, min_elements_per_thread);

    // Batch invert in parallel, without copying the vector
    v.par_chunks_mut(num_elem_per_thread).for_each(|chunk| {
        serial_batch_inversion_and_mul(chunk, coeff);
    });
}

/// Given a vector of field elements {v_i}, compute the vector {coeff * v_i^(-1)}.
/// This method is explicitly single-threaded.
fn serial_batch_inversion_and_mul<F: Field>(v: &mut [F], coeff: &F) {
    // Montgomery's Trick and Fast Implementation of Masked AES
    // Genelle, Prouff and Quisquater
    // Section 3.2
    // but with an optimization to multiply every element in the returned vector by
    // coeff

    // First pass: compute [a, ab, abc, ...]
    let mut prod = Vec::with_capacity(v.len());
    let mut tmp = F::ONE;
    for f in v.iter().filter(|f| !f.is_zero()) {
        tmp.mul_assign(*f);
        prod.push(tmp);
    }

    // Invert `tmp`.
    tmp = tmp.try_inverse().unwrap(); // Guaranteed to be nonzero.

    // Multiply product by coeff, so all inverses will be scaled by coeff
    tmp *= *coeff;

    // Second pass: iterate backwards to compute inverses
    for (f, s) in v
        .iter_mut()
        // Backwards
        .rev()
        // Ignore normalized elements
        .filter(|f| !f.is_zero())
        // Backwards, skip last element, fill in one for last term.
        .zip(prod.into_iter().rev().skip(1).chain(Some(F::ONE)))
    {
        // tmp := tmp * f; f := tmp * s = 1/f
        let new_tmp = tmp * *f;
        *f = tmp * s;
        tmp = new_tmp;
    }
}

/// Barycentric evaluation of the polynomial interpolating `(points, evals)`
/// at `at`.
pub fn extrapolate<F: Field>(points: &[F], weights: &[F], evals: &[F], at: &F) -> F {
    let (coeffs, sum_inv) = {
        let mut coeffs = points.iter().map(|point| *at - *point).collect::<Vec<_>>();
        serial_batch_inversion(&mut coeffs);
        let mut sum = F::ZERO;
        coeffs.iter_mut().zip(weights).for_each(|(coeff, weight)| {
            *coeff *= *weight;
            sum += *coeff
        });
        let sum_inv = sum.try_inverse().unwrap_or(F::ZERO);
        (coeffs, sum_inv)
    };
    coeffs
        .iter()
        .zip(evals)
        .map(|(coeff, eval)| *coeff * *eval)
        .sum::<F>()
        * sum_inv
}

/// The barycentric points `0..=degree` and their weights, one entry per term
/// degree `1..max_degree`.
pub fn extrapolation_aux<F: Field>(max_degree: usize) -> Vec<(Vec<F>, Vec<F>)> {
    (1..max_degree)
        .map(|degree| {
            let points = (0..1 + degree as u64).map(F::from_u64).collect::<Vec<_>>();
            let weights = barycentric_weights(&points);
            (points, weights)
        })
        .collect::<Vec<_>>()
}

#[derive(Clone, Debug, Default)]
pub struct AdditiveVec<F>(pub Vec<F>);

impl<F> Deref for AdditiveVec<F> {
    type Target = Vec<F>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<F> DerefMut for AdditiveVec<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<F: PrimeCharacteristicRing + Copy> AdditiveVec<F> {
    pub fn new(len: usize) -> Self {
        Self(vec![F::ZERO; len])
    }
}

impl<F: PrimeCharacteristicRing + Copy> AddAssign for AdditiveVec<F> {
    fn add_assign(&mut self, rhs: Self) {
        self.0
            .iter_mut()
            .zip(rhs.0)
            .for_each(|(lhs, rhs)| *lhs += rhs);
    }
}

impl<F: PrimeCharacteristicRing + Copy> Add for AdditiveVec<F> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl<F: PrimeCharacteristicRing + Copy> MulAssign<F> for AdditiveVec<F> {
    fn mul_assign(&mut self, rhs: F) {
        self.0.iter_mut().for_each(|lhs| *lhs *= rhs);
    }
}
