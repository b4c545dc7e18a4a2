use ff_ext::{ExtensionField, SmallField};
use p3_field::{Field, PrimeCharacteristicRing, TwoAdicField};

use crate::{
    error::GkrError,
    structs::{AuxLayout, CircuitWitness, GateSource, LayerKind, LayeredCircuit},
};

/// Exponentiation by squaring; kept local so the witness path has no
/// dependence on field-specific pow helpers.
pub(crate) fn pow_u64<F: Field>(base: F, mut exp: u64) -> F {
    let mut acc = F::ONE;
    let mut cur = base;
    while exp > 0 {
        if exp & 1 == 1 {
            acc *= cur;
        }
        cur = cur.square();
        exp >>= 1;
    }
    acc
}

/// In-place radix-2 NTT in natural order: `out[j] = sum_l omega^{j*l} in[l]`
/// with `omega` of order `values.len()`.
pub fn ntt_in_place<F: Field>(values: &mut [F], omega: F) {
    let n = values.len();
    debug_assert!(n.is_power_of_two());

    // bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            values.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let wlen = pow_u64(omega, (n / len) as u64);
        for start in (0..n).step_by(len) {
            let mut w = F::ONE;
            for p in start..start + len / 2 {
                let x = values[p];
                let y = values[p + len / 2] * w;
                values[p] = x + y;
                values[p + len / 2] = x - y;
                w *= wlen;
            }
        }
        len <<= 1;
    }
}

/// Split a field value into (is_negative, magnitude), reading canonical
/// representatives above `(p-1)/2` as negative.
fn sign_split<F: SmallField>(value: F) -> (bool, u64) {
    let canonical = value.to_canonical_u64();
    let half = F::MODULUS_U64 >> 1;
    if canonical > half {
        (true, F::MODULUS_U64 - canonical)
    } else {
        (false, canonical)
    }
}

fn decompose_bits<F: Field + PrimeCharacteristicRing>(
    magnitude: u64,
    bits: usize,
    out: &mut [F],
) -> Result<(), GkrError> {
    if bits < 64 && magnitude >= (1u64 << bits) {
        return Err(GkrError::InvalidTopology(format!(
            "magnitude {magnitude} does not fit in {bits} bits"
        )));
    }
    for (t, slot) in out.iter_mut().enumerate() {
        *slot = F::from_bool((magnitude >> t) & 1 == 1);
    }
    Ok(())
}

impl<E: ExtensionField> CircuitWitness<E> {
    /// Forward-evaluate the circuit on a concrete input tensor: the
    /// wire-value provider the backward reduction is checked against.
    ///
    /// Activation layers fill their decomposition blocks in the input pool
    /// before their own gates are evaluated, so the pool is complete by the
    /// time it is committed.
    pub fn generate(
        circuit: &LayeredCircuit<E>,
        input: &[E::BaseField],
    ) -> Result<Self, GkrError> {
        if input.len() as u64 != circuit.input_len {
            return Err(GkrError::InvalidTopology(format!(
                "input length {} does not match the circuit's {}",
                input.len(),
                circuit.input_len
            )));
        }

        let input_bl = circuit.layers[0].bit_length;
        let mut pool = vec![E::BaseField::ZERO; 1 << input_bl];
        pool[0] = E::BaseField::ONE;
        pool[1..1 + input.len()].copy_from_slice(input);
        pool[1 + input.len()..1 + input.len() + circuit.model_constants.len()]
            .copy_from_slice(&circuit.model_constants);

        let mut layers = vec![pool];

        for (id, layer) in circuit.layers.iter().enumerate().skip(1) {
            // the auxiliary witness of this layer, written into the pool
            if let (Some(range), Some(aux)) = (&layer.decomp_range, &layer.aux) {
                let len = (range.end - range.start) as usize;
                let writes = Self::fill_aux(len, aux, &layers[id - 1])?;
                debug_assert_eq!(writes.len(), len);
                let start = range.start as usize;
                layers[0][start..start + writes.len()].copy_from_slice(&writes);
            }

            let values = if layer.ty.is_transform() {
                let k = layer.fft_bit_length as usize;
                let mut omega = E::BaseField::two_adic_generator(k);
                if layer.ty == LayerKind::Ifft {
                    omega = omega.inverse();
                }
                let mut values = layers[id - 1].clone();
                values
                    .chunks_mut(1 << k)
                    .for_each(|block| ntt_in_place(block, omega));
                values
            } else {
                let prev = &layers[id - 1];
                let pool = &layers[0];
                let fetch = |src: GateSource, idx: u64| -> E::BaseField {
                    match src {
                        GateSource::Prev => prev[idx as usize],
                        GateSource::Input => pool[layer.input_pool[idx as usize] as usize],
                    }
                };

                let mut values = vec![E::BaseField::ZERO; 1 << layer.bit_length];
                for gate in &layer.uni_gates {
                    values[gate.g as usize] +=
                        circuit.selectors[gate.sc as usize] * fetch(gate.src, gate.u);
                }
                for gate in &layer.bin_gates {
                    values[gate.g as usize] += circuit.selectors[gate.sc as usize]
                        * fetch(gate.source_u(), gate.u)
                        * fetch(gate.source_v(), gate.v);
                }
                values
            };

            let mut values = values;
            if layer.scale != E::BaseField::ONE {
                values.iter_mut().for_each(|v| *v *= layer.scale);
            }
            layers.push(values);
        }

        Ok(Self { layers })
    }

    /// Compute the decomposition block of one activation layer from the
    /// previous layer's values.
    fn fill_aux(
        block_len: usize,
        aux: &AuxLayout,
        prev: &[E::BaseField],
    ) -> Result<Vec<E::BaseField>, GkrError> {
        match *aux {
            AuxLayout::Relu { magnitude_bits } => {
                let stride = magnitude_bits + 1;
                let n_real = block_len / stride;
                let mut block = vec![E::BaseField::ZERO; n_real * stride];
                for g in 0..n_real {
                    let (neg, magnitude) = sign_split(prev[g]);
                    block[g * stride] = E::BaseField::from_bool(neg);
                    decompose_bits(
                        magnitude,
                        magnitude_bits,
                        &mut block[g * stride + 1..(g + 1) * stride],
                    )?;
                }
                Ok(block)
            }
            AuxLayout::MaxPool {
                window,
                magnitude_bits,
            } => {
                let stride = window * (magnitude_bits + 1);
                let n_real = block_len / stride;
                let mut block = vec![E::BaseField::ZERO; n_real * stride];
                for o in 0..n_real {
                    let window_vals = &prev[o * window..(o + 1) * window];
                    let signed = window_vals
                        .iter()
                        .map(|v| {
                            let (neg, magnitude) = sign_split(*v);
                            if neg {
                                -(magnitude as i128)
                            } else {
                                magnitude as i128
                            }
                        })
                        .collect::<Vec<_>>();
                    let argmax = (0..window)
                        .max_by_key(|&i| (signed[i], std::cmp::Reverse(i)))
                        .unwrap();
                    block[o * stride + argmax] = E::BaseField::ONE;
                    for i in 0..window {
                        let diff = (signed[argmax] - signed[i]) as u64;
                        let offset = o * stride + window + i * magnitude_bits;
                        decompose_bits(
                            diff,
                            magnitude_bits,
                            &mut block[offset..offset + magnitude_bits],
                        )?;
                    }
                }
                Ok(block)
            }
        }
    }
}
