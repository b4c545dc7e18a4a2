//! Helpers shared by the prover and the verifier: eq-style predicate
//! evaluation over the sparse gate lists, the closed-form butterfly factors
//! of the transform layers, and the subset predicates tying a layer's pool
//! window back to the input layer.

use std::sync::Arc;

use ff_ext::ExtensionField;
use multilinear_extensions::{
    mle::{ArcMultilinearExtension, DenseMultilinearExtension},
    virtual_poly::build_eq_x_r_vec,
};
use rayon::prelude::*;

use crate::structs::Layer;

/// `eq(point, idx)` for a binary index embedded in `point.len()` bits. High
/// bits of an index smaller than the full domain contribute the
/// `(1 - p_t)` padding factors.
pub fn eq_at_index<E: ExtensionField>(point: &[E], idx: u64) -> E {
    point
        .iter()
        .enumerate()
        .map(|(t, p)| {
            if (idx >> t) & 1 == 1 {
                *p
            } else {
                E::ONE - *p
            }
        })
        .product()
}

/// Successive powers `base^0, ..., base^{n-1}`.
pub fn powers<E: ExtensionField>(base: E, n: usize) -> Vec<E> {
    let mut pows = Vec::with_capacity(n);
    let mut cur = E::ONE;
    for _ in 0..n {
        pows.push(cur);
        cur *= base;
    }
    pows
}

/// Lift a base-field table into an extension-field MLE.
pub fn ext_mle<E: ExtensionField>(
    num_vars: usize,
    values: &[E::BaseField],
) -> DenseMultilinearExtension<E> {
    debug_assert_eq!(values.len(), 1 << num_vars);
    DenseMultilinearExtension::from_evaluations_vec(
        num_vars,
        values.iter().map(|v| E::from_base(*v)).collect(),
    )
}

/// Repeat a table of `2^from` entries up to `2^to` entries. The multilinear
/// extension of the tiled table only depends on the low `from` variables, so
/// binding all `to` variables evaluates the original extension at the point
/// prefix.
pub fn tile_table<T: Copy>(values: &[T], to: usize) -> Vec<T> {
    debug_assert!(values.len().is_power_of_two());
    let mut out = Vec::with_capacity(1 << to);
    while out.len() < (1 << to) {
        out.extend_from_slice(values);
    }
    debug_assert_eq!(out.len(), 1 << to);
    out
}

/// The merged output predicate `sum_j coeff_j * eq(r_j, .)` as a dense
/// table over the layer's output domain.
pub fn merged_eq_table<E: ExtensionField>(
    bit_length: usize,
    claims: &[(Vec<E>, E)],
    coeffs: &[E],
) -> Vec<E> {
    let mut table = vec![E::ZERO; 1 << bit_length];
    for ((point, _), coeff) in claims.iter().zip(coeffs) {
        let eq = build_eq_x_r_vec(point);
        table
            .par_iter_mut()
            .zip(eq.into_par_iter())
            .for_each(|(acc, e)| *acc += *coeff * e);
    }
    table
}

/// The evaluation point of a layer's zero claim: random low coordinates over
/// the aligned assertion block, the block's binary address above them.
pub fn zero_block_point<E: ExtensionField>(layer: &Layer<E>, rho: &[E]) -> Vec<E> {
    let bits = layer.zero_block_bits();
    debug_assert_eq!(rho.len(), bits);
    let addr = layer.zero_start_id >> bits;
    let mut point = rho.to_vec();
    for t in 0..layer.bit_length - bits {
        point.push(E::from_bool((addr >> t) & 1 == 1));
    }
    point
}

/// `omega^(2^i)` for `i < 2k`; entries from `k` on collapse to one since
/// `omega` has order `2^k`.
pub fn omega_squares<E: ExtensionField>(omega: E::BaseField, k: usize) -> Vec<E::BaseField> {
    let mut squares = Vec::with_capacity(2 * k);
    let mut cur = omega;
    for _ in 0..2 * k {
        squares.push(cur);
        cur = cur.square();
    }
    squares
}

/// The `s`-th butterfly factor of a transform layer's predicate, evaluated
/// in closed form at a field point of the element domain:
/// `f_s(x) = (1 - r_s) + r_s * prod_t ((1 - x_t) + x_t * omega^(2^(s+t)))`.
/// Cost is linear in `fft_bit_length`.
pub fn fft_factor_eval<E: ExtensionField>(
    r_s: E,
    s: usize,
    omega_squares: &[E::BaseField],
    x_lo: &[E],
) -> E {
    let prod = x_lo
        .iter()
        .enumerate()
        .map(|(t, x)| E::ONE - *x + *x * E::from_base(omega_squares[s + t]))
        .product::<E>();
    E::ONE - r_s + r_s * prod
}

/// Dense tables of all `k` butterfly factors for one claim point, tiled to
/// the layer's full domain. `f_s[l] = (1 - r_s) + r_s * omega^(2^s * l)`
/// over the element index `l`; the tables agree with the closed form on the
/// hypercube.
pub fn fft_factor_tables<E: ExtensionField>(
    r_lo: &[E],
    omega: E::BaseField,
    num_vars: usize,
) -> Vec<ArcMultilinearExtension<E>> {
    let k = r_lo.len();
    let squares = omega_squares::<E>(omega, k);
    (0..k)
        .map(|s| {
            let omega_s = squares[s];
            let mut table = Vec::with_capacity(1 << k);
            let mut pow = E::BaseField::ONE;
            for _ in 0..1u64 << k {
                table.push(E::ONE - r_lo[s] + r_lo[s] * E::from_base(pow));
                pow *= omega_s;
            }
            Arc::new(DenseMultilinearExtension::from_evaluations_vec(
                num_vars,
                tile_table(&table, num_vars),
            ))
        })
        .collect()
}

/// The block-index part of a transform claim's predicate, as a table over
/// the full domain: `eq(r_hi, x_hi)`, constant in the element index.
pub fn block_eq_table<E: ExtensionField>(r_hi: &[E], k: usize) -> Vec<E> {
    let eq_hi = build_eq_x_r_vec(r_hi);
    let mut table = Vec::with_capacity(eq_hi.len() << k);
    for value in eq_hi {
        table.extend(std::iter::repeat(value).take(1 << k));
    }
    table
}

/// Scatter one deferred pool claim into the merged input predicate table:
/// `P[alias[t]] += coeff * eq(point, t)`.
pub fn scatter_pool_claim<E: ExtensionField>(
    table: &mut [E],
    coeff: E,
    point: &[E],
    alias: &[u64],
) {
    let eq = build_eq_x_r_vec(point);
    for (t, &wire) in alias.iter().enumerate() {
        table[wire as usize] += coeff * eq[t];
    }
}

/// Verifier-side evaluation of one pool claim's subset predicate at the
/// merged point: `sum_t eq(point, t) * eq(w_point, alias[t])`, streamed from
/// the alias table.
pub fn pool_claim_eval<E: ExtensionField>(point: &[E], alias: &[u64], w_point: &[E]) -> E {
    let eq = build_eq_x_r_vec(point);
    alias
        .iter()
        .enumerate()
        .map(|(t, &wire)| eq[t] * eq_at_index(w_point, wire))
        .sum()
}

