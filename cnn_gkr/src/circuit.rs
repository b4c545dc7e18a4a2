use ff_ext::ExtensionField;

use crate::{
    error::GkrError,
    structs::{GateSource, Layer, LayerKind, LayeredCircuit},
};

mod witness;

pub use witness::ntt_in_place;
pub(crate) use witness::pow_u64;

impl<E: ExtensionField> LayeredCircuit<E> {
    pub fn input_layer(&self) -> &Layer<E> {
        &self.layers[0]
    }

    pub fn output_layer(&self) -> &Layer<E> {
        self.layers.last().unwrap()
    }

    /// log2 of the aligned block spanning the decomposition region.
    pub fn aux_block_bits(&self) -> usize {
        let len = (self.aux_range.end - self.aux_range.start) as usize;
        if len == 0 {
            0
        } else {
            multilinear_extensions::util::ceil_log2(len)
        }
    }

    /// Check every construction invariant of the circuit; the reduction
    /// engine assumes a validated circuit.
    pub fn validate(&self) -> Result<(), GkrError> {
        if self.layers.is_empty() {
            return Err(GkrError::InvalidTopology("circuit has no layers".into()));
        }
        if self.layers[0].ty != LayerKind::Input {
            return Err(GkrError::InvalidTopology(
                "layer 0 must be the input layer".into(),
            ));
        }
        if self.layers[0].scale != E::BaseField::ONE {
            return Err(GkrError::InvalidTopology(
                "input layer must not carry a scale".into(),
            ));
        }

        let input_bl = self.layers[0].bit_length;
        if self.aux_range.end > (1u64 << input_bl) {
            return Err(GkrError::InvalidTopology(
                "decomposition region exceeds the input layer".into(),
            ));
        }
        if self.aux_range.start < self.aux_range.end {
            let bits = self.aux_block_bits();
            if self.aux_range.start % (1u64 << bits) != 0
                || self.aux_range.start + (1u64 << bits) > (1u64 << input_bl)
            {
                return Err(GkrError::InvalidTopology(
                    "decomposition region is not an aligned block".into(),
                ));
            }
        }

        for (id, layer) in self.layers.iter().enumerate() {
            self.validate_layer(id, layer)?;
        }
        Ok(())
    }

    fn validate_layer(&self, id: usize, layer: &Layer<E>) -> Result<(), GkrError> {
        let fail = |msg: String| Err(GkrError::InvalidTopology(format!("layer {id}: {msg}")));

        if layer.size > (1u64 << layer.bit_length) {
            return fail(format!(
                "size {} exceeds output domain 2^{}",
                layer.size, layer.bit_length
            ));
        }
        if layer.zero_start_id > layer.size {
            return fail("zero_start_id exceeds size".into());
        }
        if layer.scale == E::BaseField::ZERO {
            return fail("scale must be invertible".into());
        }

        // The alias window is strictly increasing and in range, so
        // intra-pool references are acyclic by construction.
        let input_size = 1u64 << self.layers[0].bit_length;
        let mut last = None;
        for &wire in &layer.input_pool {
            if wire >= input_size {
                return fail(format!("alias wire {wire} outside the input layer"));
            }
            if let Some(prev) = last {
                if wire <= prev {
                    return fail("alias window is not strictly increasing".into());
                }
            }
            last = Some(wire);
        }

        if id == 0 {
            if !layer.uni_gates.is_empty() || !layer.bin_gates.is_empty() {
                return fail("input layer must not carry gates".into());
            }
            return Ok(());
        }

        if layer.ty == LayerKind::Input {
            return fail("only layer 0 may be the input layer".into());
        }

        let prev_bl = self.layers[id - 1].bit_length;
        let pool_len = layer.input_pool.len() as u64;
        let operand_range = |src: GateSource| -> u64 {
            match src {
                GateSource::Input => pool_len,
                GateSource::Prev => 1u64 << prev_bl,
            }
        };

        if layer.ty.is_transform() {
            if !layer.uni_gates.is_empty() || !layer.bin_gates.is_empty() {
                return fail("transform layers carry no gate list".into());
            }
            let k = layer.fft_bit_length;
            if k < 1 || (k as usize) > layer.bit_length {
                return fail(format!("invalid fft_bit_length {k}"));
            }
            if layer.bit_length != prev_bl {
                return fail("transform layers preserve the domain size".into());
            }
            return Ok(());
        }

        if layer.uni_gates.is_empty() && layer.bin_gates.is_empty() {
            return fail("gate layer without gates".into());
        }

        let mut reads_prev = false;
        for gate in &layer.uni_gates {
            if gate.g >= layer.size {
                return fail(format!("unary gate output {} out of range", gate.g));
            }
            if gate.u >= operand_range(gate.src) {
                return fail(format!("unary gate operand {} out of range", gate.u));
            }
            if gate.sc as usize >= self.selectors.len() {
                return fail(format!("selector id {} out of range", gate.sc));
            }
            reads_prev |= gate.src == GateSource::Prev;
        }
        for gate in &layer.bin_gates {
            if gate.g >= layer.size {
                return fail(format!("binary gate output {} out of range", gate.g));
            }
            if gate.u >= operand_range(gate.source_u()) {
                return fail(format!("binary gate operand u {} out of range", gate.u));
            }
            if gate.v >= operand_range(gate.source_v()) {
                return fail(format!("binary gate operand v {} out of range", gate.v));
            }
            if gate.sc as usize >= self.selectors.len() {
                return fail(format!("selector id {} out of range", gate.sc));
            }
            reads_prev |= gate.source_u() == GateSource::Prev;
            reads_prev |= gate.source_v() == GateSource::Prev;
        }
        if !reads_prev {
            return fail("gate layer never reads the previous layer".into());
        }

        if !layer.need_phase2 && !layer.bin_gates.is_empty() {
            return fail("need_phase2 unset but binary gates exist".into());
        }
        if !layer.need_phase2 && layer.max_bl_v != 0 {
            return fail("need_phase2 unset but max_bl_v is nonzero".into());
        }

        // Assertion wires occupy an aligned block so the zero claim can be
        // phrased as an evaluation of the layer's own extension.
        if layer.zero_start_id < layer.size {
            let bits = layer.zero_block_bits();
            if layer.zero_start_id % (1u64 << bits) != 0 {
                return fail("assertion block is not aligned".into());
            }
            if layer.zero_start_id + (1u64 << bits) > (1u64 << layer.bit_length) {
                return fail("assertion block exceeds the output domain".into());
            }
        }

        if matches!(layer.ty, LayerKind::Relu | LayerKind::MaxPool) {
            match &layer.decomp_range {
                None => return fail("activation layer without a decomposition block".into()),
                Some(range) => {
                    if range.start < self.aux_range.start || range.end > self.aux_range.end {
                        return fail(
                            "decomposition block outside the circuit's decomposition region"
                                .into(),
                        );
                    }
                }
            }
        }

        Ok(())
    }
}
