//! Translation from a network architecture description to a
//! [`LayeredCircuit`]: interns model constants and transformed kernels into
//! the committed input pool, allocates decomposition blocks and aligned
//! assertion regions, and emits the transform pipeline for FFT
//! convolutions.

use std::collections::HashMap;

use ff_ext::ExtensionField;

use crate::{
    circuit::ntt_in_place,
    error::GkrError,
    structs::{
        AuxLayout, BinGate, GateSource, Layer, LayerKind, LayeredCircuit, ScalarId, UniGate,
        U_FROM_PREV, V_FROM_PREV,
    },
};
use multilinear_extensions::util::ceil_log2;

/// One stage of a network architecture. Weights and biases are model
/// constants: they are interned into the committed input pool (not into the
/// selector table), so a commitment to the input layer also binds the
/// model.
#[derive(Clone, Debug)]
pub enum LayerSpec<F> {
    FullyConnected {
        /// `weights[o][i]` multiplies input `i` into output `o`.
        weights: Vec<Vec<F>>,
        bias: Vec<F>,
    },
    DotProd {
        weights: Vec<Vec<F>>,
    },
    AddBias {
        bias: Vec<F>,
    },
    Relu {
        magnitude_bits: usize,
    },
    Square,
    AvgPool {
        window: usize,
    },
    OptAvgPool {
        window: usize,
        /// Upstream normalization folded into the same post-multiply.
        norm: u64,
    },
    MaxPool {
        window: usize,
        magnitude_bits: usize,
    },
    Conv1d {
        /// `kernels[co][ci][d]`, applied as correlation over each input
        /// channel's spatial axis.
        kernels: Vec<Vec<Vec<F>>>,
        via_fft: bool,
    },
}

/// A network architecture: the input tensor length and the stages applied
/// to it, in order.
#[derive(Clone, Debug)]
pub struct Network<F> {
    pub input_len: usize,
    pub layers: Vec<LayerSpec<F>>,
}

struct Assembler<E: ExtensionField> {
    selectors: Vec<E::BaseField>,
    selector_ids: HashMap<u64, ScalarId>,
    model_constants: Vec<E::BaseField>,
    two_mul: Vec<E::BaseField>,
}

impl<E: ExtensionField> Assembler<E> {
    fn new() -> Self {
        let two_mul = {
            let mut pows = Vec::with_capacity(64);
            let mut cur = E::BaseField::ONE;
            for _ in 0..64 {
                pows.push(cur);
                cur += cur;
            }
            pows
        };
        Self {
            selectors: vec![],
            selector_ids: HashMap::new(),
            model_constants: vec![],
            two_mul,
        }
    }

    fn selector(&mut self, value: E::BaseField) -> ScalarId {
        let key = value.to_canonical_u64();
        if let Some(id) = self.selector_ids.get(&key) {
            return *id;
        }
        let id = self.selectors.len() as ScalarId;
        self.selectors.push(value);
        self.selector_ids.insert(key, id);
        id
    }

    /// Intern a run of model constants, returning its offset in the
    /// constants region.
    fn constants(&mut self, values: impl IntoIterator<Item = E::BaseField>) -> usize {
        let offset = self.model_constants.len();
        self.model_constants.extend(values);
        offset
    }
}

fn align_up(value: u64, pow2: u64) -> u64 {
    value.div_ceil(pow2) * pow2
}

/// Per-spec planning data gathered before wire addresses are final.
struct Plan {
    const_offset: usize,
    aux_offset: u64,
    aux_len: u64,
}

impl<F> Network<F> {
    /// Number of real output wires a stage produces from `n` inputs.
    fn out_len(spec: &LayerSpec<F>, n: usize) -> Result<usize, GkrError> {
        let err = |msg: &str| Err(GkrError::InvalidTopology(msg.into()));
        Ok(match spec {
            LayerSpec::FullyConnected { weights, bias } => {
                if weights.is_empty() || weights.iter().any(|row| row.len() != n) {
                    return err("fully-connected weight shape does not match the input");
                }
                if bias.len() != weights.len() {
                    return err("fully-connected bias shape does not match");
                }
                weights.len()
            }
            LayerSpec::DotProd { weights } => {
                if weights.is_empty() || weights.iter().any(|row| row.len() != n) {
                    return err("dot-product weight shape does not match the input");
                }
                weights.len()
            }
            LayerSpec::AddBias { bias } => {
                if bias.len() != n {
                    return err("bias shape does not match the input");
                }
                n
            }
            LayerSpec::Relu { magnitude_bits } => {
                if *magnitude_bits == 0 || *magnitude_bits > 62 {
                    return err("unsupported magnitude bit width");
                }
                n
            }
            LayerSpec::Square => n,
            LayerSpec::AvgPool { window } | LayerSpec::MaxPool { window, .. } => {
                if *window == 0 || n % window != 0 {
                    return err("pooling window does not divide the input");
                }
                n / window
            }
            LayerSpec::OptAvgPool { window, norm } => {
                if *window == 0 || n % window != 0 || *norm == 0 {
                    return err("pooling window does not divide the input");
                }
                n / window
            }
            LayerSpec::Conv1d { kernels, .. } => {
                let (out_ch, in_ch, k_len) = conv_shape(kernels)?;
                if n % in_ch != 0 {
                    return err("input channels do not divide the input");
                }
                let n_sp = n / in_ch;
                if k_len > n_sp {
                    return err("kernel longer than the spatial axis");
                }
                out_ch * (n_sp - k_len + 1)
            }
        })
    }
}

fn conv_shape<F>(kernels: &[Vec<Vec<F>>]) -> Result<(usize, usize, usize), GkrError> {
    let err = |msg: &str| Err(GkrError::InvalidTopology(msg.into()));
    if kernels.is_empty() || kernels[0].is_empty() || kernels[0][0].is_empty() {
        return err("empty convolution kernel");
    }
    let (out_ch, in_ch, k_len) = (kernels.len(), kernels[0].len(), kernels[0][0].len());
    if kernels
        .iter()
        .any(|k| k.len() != in_ch || k.iter().any(|c| c.len() != k_len))
    {
        return err("ragged convolution kernel");
    }
    Ok((out_ch, in_ch, k_len))
}

impl<F> Network<F> {
    /// Count the decomposition bits a stage needs.
    fn aux_len(spec: &LayerSpec<F>, n: usize) -> u64 {
        match spec {
            LayerSpec::Relu { magnitude_bits } => (n * (magnitude_bits + 1)) as u64,
            LayerSpec::MaxPool {
                window,
                magnitude_bits,
            } => ((n / window) * window * (magnitude_bits + 1)) as u64,
            _ => 0,
        }
    }
}

impl<E: ExtensionField> LayeredCircuit<E> {
    /// Compile a network description into a validated layered circuit.
    pub fn compile(network: &Network<E::BaseField>) -> Result<Self, GkrError> {
        if network.input_len == 0 || network.layers.is_empty() {
            return Err(GkrError::InvalidTopology(
                "network needs an input and at least one stage".into(),
            ));
        }

        let mut asm = Assembler::<E>::new();

        // Pass A: intern constants, plan aux offsets, simulate sizes.
        let mut plans = Vec::with_capacity(network.layers.len());
        let mut aux_total = 0u64;
        let mut n = network.input_len;
        for spec in &network.layers {
            let n_out = Network::out_len(spec, n)?;
            let const_offset = asm.model_constants.len();
            intern_constants::<E>(&mut asm, spec, n)?;
            let aux_len = Network::aux_len(spec, n);
            plans.push(Plan {
                const_offset,
                aux_offset: aux_total,
                aux_len,
            });
            aux_total += aux_len;
            n = n_out;
        }

        // Input pool layout: constant one, input tensor, model constants,
        // then the aligned decomposition region.
        let const_end = 1 + network.input_len as u64 + asm.model_constants.len() as u64;
        let (aux_start, aux_end, input_size) = if aux_total > 0 {
            let block = 1u64 << ceil_log2(aux_total as usize);
            let start = align_up(const_end, block);
            (start, start + aux_total, start + block)
        } else {
            (const_end, const_end, const_end)
        };
        let input_bl = ceil_log2(input_size as usize);

        let mut input_layer = Layer::new(LayerKind::Input, input_bl, aux_end);
        input_layer.zero_start_id = aux_end;
        let mut layers = vec![input_layer];

        // Pass B: emit gate and transform layers with final wire addresses.
        let mut ctx = EmitCtx {
            asm: &mut asm,
            const_base: 1 + network.input_len as u64,
            aux_start,
            cur_real: network.input_len,
        };

        // Re-index the input tensor to wire 0: every later stage addresses
        // the previous layer's real outputs from zero.
        let sel_one = ctx.asm.selector(E::BaseField::ONE);
        let mut ingest = new_gate_layer::<E>(LayerKind::Padding, network.input_len);
        for i in 0..network.input_len as u64 {
            ingest.uni_gates.push(UniGate {
                g: i,
                u: 1 + i,
                src: GateSource::Prev,
                sc: sel_one,
            });
        }
        push_layer(&mut layers, &mut ctx, ingest, network.input_len);

        for (spec, plan) in network.layers.iter().zip(&plans) {
            emit_spec::<E>(&mut layers, &mut ctx, spec, plan)?;
        }

        let circuit = LayeredCircuit {
            layers,
            selectors: ctx.asm.selectors.clone(),
            two_mul: ctx.asm.two_mul.clone(),
            input_len: network.input_len as u64,
            model_constants: ctx.asm.model_constants.clone(),
            aux_range: aux_start..aux_end,
        };
        circuit.validate()?;
        Ok(circuit)
    }
}

struct EmitCtx<'a, E: ExtensionField> {
    asm: &'a mut Assembler<E>,
    const_base: u64,
    aux_start: u64,
    cur_real: usize,
}

impl<'a, E: ExtensionField> EmitCtx<'a, E> {
    fn const_wire(&self, plan: &Plan, offset: usize) -> u64 {
        self.const_base + (plan.const_offset + offset) as u64
    }

    fn aux_wire(&self, plan: &Plan, offset: u64) -> u64 {
        self.aux_start + plan.aux_offset + offset
    }
}

/// Intern the constants a stage owns, in the order its pool windows expect.
fn intern_constants<E: ExtensionField>(
    asm: &mut Assembler<E>,
    spec: &LayerSpec<E::BaseField>,
    n: usize,
) -> Result<(), GkrError> {
    match spec {
        LayerSpec::FullyConnected { weights, bias } => {
            asm.constants(weights.iter().flatten().copied());
            asm.constants(bias.iter().copied());
        }
        LayerSpec::DotProd { weights } => {
            asm.constants(weights.iter().flatten().copied());
        }
        LayerSpec::Conv1d { kernels, via_fft } => {
            let (_, in_ch, k_len) = conv_shape(kernels)?;
            if *via_fft {
                // transformed, reversed kernels: the transform-domain
                // product layer reads them directly from the pool
                let n_sp = n / in_ch;
                let k = ceil_log2(n_sp + k_len - 1);
                let omega = E::BaseField::two_adic_generator(k);
                for per_out in kernels {
                    for kernel in per_out {
                        let mut padded = vec![E::BaseField::ZERO; 1 << k];
                        for (d, value) in kernel.iter().rev().enumerate() {
                            padded[d] = *value;
                        }
                        ntt_in_place(&mut padded, omega);
                        asm.constants(padded);
                    }
                }
            } else {
                asm.constants(kernels.iter().flatten().flatten().copied());
            }
        }
        _ => {}
    }
    Ok(())
}

fn emit_spec<E: ExtensionField>(
    layers: &mut Vec<Layer<E>>,
    ctx: &mut EmitCtx<E>,
    spec: &LayerSpec<E::BaseField>,
    plan: &Plan,
) -> Result<(), GkrError> {
    let n = ctx.cur_real;
    match spec {
        LayerSpec::FullyConnected { weights, bias } => {
            let n_out = weights.len();
            let mut layer = new_gate_layer::<E>(LayerKind::FullyConnected, n_out);
            let sel_one = ctx.asm.selector(E::BaseField::ONE);
            let pool: Vec<u64> = (0..n_out * n + n_out)
                .map(|j| ctx.const_wire(plan, j))
                .collect();
            for o in 0..n_out {
                for i in 0..n {
                    layer.bin_gates.push(BinGate {
                        g: o as u64,
                        u: i as u64,
                        v: (o * n + i) as u64,
                        sc: sel_one,
                        locality: U_FROM_PREV,
                    });
                }
                layer.uni_gates.push(UniGate {
                    g: o as u64,
                    u: (n_out * n + o) as u64,
                    src: GateSource::Input,
                    sc: sel_one,
                });
            }
            debug_assert_eq!(bias.len(), n_out);
            layer.input_pool = pool;
            push_layer(layers, ctx, layer, n_out);
        }
        LayerSpec::DotProd { weights } => {
            let n_out = weights.len();
            let mut layer = new_gate_layer::<E>(LayerKind::DotProd, n_out);
            let sel_one = ctx.asm.selector(E::BaseField::ONE);
            layer.input_pool = (0..n_out * n).map(|j| ctx.const_wire(plan, j)).collect();
            for o in 0..n_out {
                for i in 0..n {
                    layer.bin_gates.push(BinGate {
                        g: o as u64,
                        u: i as u64,
                        v: (o * n + i) as u64,
                        sc: sel_one,
                        locality: U_FROM_PREV,
                    });
                }
            }
            push_layer(layers, ctx, layer, n_out);
        }
        LayerSpec::AddBias { bias } => {
            let mut layer = new_gate_layer::<E>(LayerKind::AddBias, n);
            let sel_one = ctx.asm.selector(E::BaseField::ONE);
            layer.input_pool = vec![0];
            for g in 0..n {
                layer.uni_gates.push(UniGate {
                    g: g as u64,
                    u: g as u64,
                    src: GateSource::Prev,
                    sc: sel_one,
                });
                let sel_bias = ctx.asm.selector(bias[g]);
                layer.uni_gates.push(UniGate {
                    g: g as u64,
                    u: 0,
                    src: GateSource::Input,
                    sc: sel_bias,
                });
            }
            push_layer(layers, ctx, layer, n);
        }
        LayerSpec::Relu { magnitude_bits } => {
            emit_relu(layers, ctx, plan, *magnitude_bits)?;
        }
        LayerSpec::Square => {
            let mut layer = new_gate_layer::<E>(LayerKind::Square, n);
            let sel_one = ctx.asm.selector(E::BaseField::ONE);
            for g in 0..n {
                layer.bin_gates.push(BinGate {
                    g: g as u64,
                    u: g as u64,
                    v: g as u64,
                    sc: sel_one,
                    locality: U_FROM_PREV | V_FROM_PREV,
                });
            }
            push_layer(layers, ctx, layer, n);
        }
        LayerSpec::AvgPool { window } => {
            emit_avg_pool(layers, ctx, LayerKind::AvgPool, *window, 1)?;
        }
        LayerSpec::OptAvgPool { window, norm } => {
            emit_avg_pool(layers, ctx, LayerKind::OptAvgPool, *window, *norm)?;
        }
        LayerSpec::MaxPool {
            window,
            magnitude_bits,
        } => {
            emit_max_pool(layers, ctx, plan, *window, *magnitude_bits)?;
        }
        LayerSpec::Conv1d { kernels, via_fft } => {
            if *via_fft {
                emit_fft_conv(layers, ctx, plan, kernels)?;
            } else {
                emit_direct_conv(layers, ctx, plan, kernels)?;
            }
        }
    }
    Ok(())
}

fn new_gate_layer<E: ExtensionField>(ty: LayerKind, n_real: usize) -> Layer<E> {
    let bit_length = ceil_log2(n_real.max(1));
    Layer::new(ty, bit_length, n_real as u64)
}

/// Finish a layer without assertion wires.
fn push_layer<E: ExtensionField>(
    layers: &mut Vec<Layer<E>>,
    ctx: &mut EmitCtx<E>,
    mut layer: Layer<E>,
    n_real: usize,
) {
    let prev_bl = layers.last().unwrap().bit_length;
    let pool_bl = ceil_log2(layer.input_pool.len().max(1));
    layer.update_size(prev_bl, pool_bl);
    layers.push(layer);
    ctx.cur_real = n_real;
}

/// Output/assertion layout of an activation layer: real wires in
/// `[0, n_real)`, assertion wires in an aligned block above them.
fn zero_block_layout(n_real: usize, n_zero: usize) -> (u64, u64, usize) {
    let block = 1u64 << ceil_log2(n_zero.max(1));
    let zero_start = align_up(n_real as u64, block);
    let size = zero_start + n_zero as u64;
    let bit_length = ceil_log2((zero_start + block) as usize);
    (zero_start, size, bit_length)
}

fn emit_relu<E: ExtensionField>(
    layers: &mut Vec<Layer<E>>,
    ctx: &mut EmitCtx<E>,
    plan: &Plan,
    magnitude_bits: usize,
) -> Result<(), GkrError> {
    let n = ctx.cur_real;
    let stride = magnitude_bits + 1;
    let (zero_start, size, bit_length) = zero_block_layout(n, n);

    let mut layer = Layer::new(LayerKind::Relu, bit_length, size);
    layer.zero_start_id = zero_start;
    layer.decomp_range =
        Some(ctx.aux_wire(plan, 0)..ctx.aux_wire(plan, 0) + plan.aux_len);
    layer.aux = Some(AuxLayout::Relu { magnitude_bits });
    layer.input_pool = (0..plan.aux_len).map(|a| ctx.aux_wire(plan, a)).collect();

    let sel_one = ctx.asm.selector(E::BaseField::ONE);
    let sel_neg_one = ctx.asm.selector(-E::BaseField::ONE);
    for g in 0..n as u64 {
        let sign = g * stride as u64;
        // out = in - sign * in
        layer.uni_gates.push(UniGate {
            g,
            u: g,
            src: GateSource::Prev,
            sc: sel_one,
        });
        layer.bin_gates.push(BinGate {
            g,
            u: g,
            v: sign,
            sc: sel_neg_one,
            locality: U_FROM_PREV,
        });

        // assertion: in - (1 - 2*sign) * sum_t 2^t b_t == 0
        let z = zero_start + g;
        layer.uni_gates.push(UniGate {
            g: z,
            u: g,
            src: GateSource::Prev,
            sc: sel_one,
        });
        for t in 0..magnitude_bits {
            let bit = sign + 1 + t as u64;
            let pow = ctx.asm.two_mul[t];
            let sel_neg_pow = ctx.asm.selector(-pow);
            let sel_double_pow = ctx.asm.selector(pow + pow);
            layer.uni_gates.push(UniGate {
                g: z,
                u: bit,
                src: GateSource::Input,
                sc: sel_neg_pow,
            });
            layer.bin_gates.push(BinGate {
                g: z,
                u: sign,
                v: bit,
                sc: sel_double_pow,
                locality: 0,
            });
        }
    }

    push_layer(layers, ctx, layer, n);
    Ok(())
}

fn emit_avg_pool<E: ExtensionField>(
    layers: &mut Vec<Layer<E>>,
    ctx: &mut EmitCtx<E>,
    ty: LayerKind,
    window: usize,
    norm: u64,
) -> Result<(), GkrError> {
    let n = ctx.cur_real;
    let n_out = n / window;
    let mut layer = new_gate_layer::<E>(ty, n_out);
    let sel_one = ctx.asm.selector(E::BaseField::ONE);
    for o in 0..n_out {
        for i in 0..window {
            layer.uni_gates.push(UniGate {
                g: o as u64,
                u: (o * window + i) as u64,
                src: GateSource::Prev,
                sc: sel_one,
            });
        }
    }
    let denominator = E::BaseField::from_u64(window as u64 * norm);
    layer.scale = denominator
        .try_inverse()
        .ok_or_else(|| GkrError::InvalidTopology("pooling scale is not invertible".into()))?;
    push_layer(layers, ctx, layer, n_out);
    Ok(())
}

fn emit_max_pool<E: ExtensionField>(
    layers: &mut Vec<Layer<E>>,
    ctx: &mut EmitCtx<E>,
    plan: &Plan,
    window: usize,
    magnitude_bits: usize,
) -> Result<(), GkrError> {
    let n = ctx.cur_real;
    let n_out = n / window;
    let stride = window * (magnitude_bits + 1);
    let n_zero = n_out * (1 + window);
    let (zero_start, size, bit_length) = zero_block_layout(n_out, n_zero);

    let mut layer = Layer::new(LayerKind::MaxPool, bit_length, size);
    layer.zero_start_id = zero_start;
    layer.decomp_range =
        Some(ctx.aux_wire(plan, 0)..ctx.aux_wire(plan, 0) + plan.aux_len);
    layer.aux = Some(AuxLayout::MaxPool {
        window,
        magnitude_bits,
    });
    // pool window: the constant-one wire, then the decomposition block
    let mut pool = vec![0u64];
    pool.extend((0..plan.aux_len).map(|a| ctx.aux_wire(plan, a)));
    layer.input_pool = pool;
    let sel_bit = |o: usize, i: usize| (1 + o * stride + i) as u64;
    let diff_bit =
        |o: usize, i: usize, t: usize| (1 + o * stride + window + i * magnitude_bits + t) as u64;

    let sel_one = ctx.asm.selector(E::BaseField::ONE);
    let sel_neg_one = ctx.asm.selector(-E::BaseField::ONE);
    for o in 0..n_out {
        // out = sum_i s_i * a_i
        for i in 0..window {
            layer.bin_gates.push(BinGate {
                g: o as u64,
                u: (o * window + i) as u64,
                v: sel_bit(o, i),
                sc: sel_one,
                locality: U_FROM_PREV,
            });
        }

        // assertion: sum_i s_i - 1 == 0
        let z_sel = zero_start + (o * (1 + window)) as u64;
        for i in 0..window {
            layer.uni_gates.push(UniGate {
                g: z_sel,
                u: sel_bit(o, i),
                src: GateSource::Input,
                sc: sel_one,
            });
        }
        layer.uni_gates.push(UniGate {
            g: z_sel,
            u: 0,
            src: GateSource::Input,
            sc: sel_neg_one,
        });

        // assertion per element: out - a_i - sum_t 2^t d_t == 0, with out
        // expanded through the selector bits
        for i in 0..window {
            let z = z_sel + 1 + i as u64;
            for j in 0..window {
                layer.bin_gates.push(BinGate {
                    g: z,
                    u: (o * window + j) as u64,
                    v: sel_bit(o, j),
                    sc: sel_one,
                    locality: U_FROM_PREV,
                });
            }
            layer.uni_gates.push(UniGate {
                g: z,
                u: (o * window + i) as u64,
                src: GateSource::Prev,
                sc: sel_neg_one,
            });
            for t in 0..magnitude_bits {
                let pow = ctx.asm.two_mul[t];
                let sel_neg_pow = ctx.asm.selector(-pow);
                layer.uni_gates.push(UniGate {
                    g: z,
                    u: diff_bit(o, i, t),
                    src: GateSource::Input,
                    sc: sel_neg_pow,
                });
            }
        }
    }

    push_layer(layers, ctx, layer, n_out);
    Ok(())
}

fn emit_direct_conv<E: ExtensionField>(
    layers: &mut Vec<Layer<E>>,
    ctx: &mut EmitCtx<E>,
    plan: &Plan,
    kernels: &[Vec<Vec<E::BaseField>>],
) -> Result<(), GkrError> {
    let (out_ch, in_ch, k_len) = conv_shape(kernels)?;
    let n_sp = ctx.cur_real / in_ch;
    let n_out_sp = n_sp - k_len + 1;
    let n_out = out_ch * n_out_sp;

    let mut layer = new_gate_layer::<E>(LayerKind::NormConv, n_out);
    let sel_one = ctx.asm.selector(E::BaseField::ONE);
    layer.input_pool = (0..out_ch * in_ch * k_len)
        .map(|j| ctx.const_wire(plan, j))
        .collect();
    for co in 0..out_ch {
        for j in 0..n_out_sp {
            let g = (co * n_out_sp + j) as u64;
            for ci in 0..in_ch {
                for d in 0..k_len {
                    layer.bin_gates.push(BinGate {
                        g,
                        u: (ci * n_sp + j + d) as u64,
                        v: ((co * in_ch + ci) * k_len + d) as u64,
                        sc: sel_one,
                        locality: U_FROM_PREV,
                    });
                }
            }
        }
    }
    push_layer(layers, ctx, layer, n_out);
    Ok(())
}

/// The transform pipeline of an FFT convolution:
/// `Padding -> Fft -> NormConvMul -> NormConvAdd -> Ifft -> Padding`.
fn emit_fft_conv<E: ExtensionField>(
    layers: &mut Vec<Layer<E>>,
    ctx: &mut EmitCtx<E>,
    plan: &Plan,
    kernels: &[Vec<Vec<E::BaseField>>],
) -> Result<(), GkrError> {
    let (out_ch, in_ch, k_len) = conv_shape(kernels)?;
    let n_sp = ctx.cur_real / in_ch;
    let n_out_sp = n_sp - k_len + 1;
    let k = ceil_log2(n_sp + k_len - 1);
    let block = 1usize << k;
    let sel_one = ctx.asm.selector(E::BaseField::ONE);

    // spread each channel into its own transform block
    let mut pad = new_gate_layer::<E>(LayerKind::Padding, in_ch * block);
    for ci in 0..in_ch {
        for j in 0..n_sp {
            pad.uni_gates.push(UniGate {
                g: (ci * block + j) as u64,
                u: (ci * n_sp + j) as u64,
                src: GateSource::Prev,
                sc: sel_one,
            });
        }
    }
    push_layer(layers, ctx, pad, in_ch * block);

    let mut fft = new_gate_layer::<E>(LayerKind::Fft, in_ch * block);
    fft.fft_bit_length = k as i8;
    push_layer(layers, ctx, fft, in_ch * block);

    // transform-domain product against the interned transformed kernels
    let mut mul = new_gate_layer::<E>(LayerKind::NormConvMul, out_ch * in_ch * block);
    mul.input_pool = (0..out_ch * in_ch * block)
        .map(|j| ctx.const_wire(plan, j))
        .collect();
    for co in 0..out_ch {
        for ci in 0..in_ch {
            for j in 0..block {
                mul.bin_gates.push(BinGate {
                    g: ((co * in_ch + ci) * block + j) as u64,
                    u: (ci * block + j) as u64,
                    v: ((co * in_ch + ci) * block + j) as u64,
                    sc: sel_one,
                    locality: U_FROM_PREV,
                });
            }
        }
    }
    push_layer(layers, ctx, mul, out_ch * in_ch * block);

    // channel accumulation
    let mut add = new_gate_layer::<E>(LayerKind::NormConvAdd, out_ch * block);
    for co in 0..out_ch {
        for ci in 0..in_ch {
            for j in 0..block {
                add.uni_gates.push(UniGate {
                    g: (co * block + j) as u64,
                    u: ((co * in_ch + ci) * block + j) as u64,
                    src: GateSource::Prev,
                    sc: sel_one,
                });
            }
        }
    }
    push_layer(layers, ctx, add, out_ch * block);

    let mut ifft = new_gate_layer::<E>(LayerKind::Ifft, out_ch * block);
    ifft.fft_bit_length = k as i8;
    ifft.scale = E::BaseField::from_u64(block as u64)
        .try_inverse()
        .ok_or_else(|| GkrError::InvalidTopology("transform scale is not invertible".into()))?;
    push_layer(layers, ctx, ifft, out_ch * block);

    // slice out the valid part of the correlation
    let mut slice = new_gate_layer::<E>(LayerKind::Padding, out_ch * n_out_sp);
    for co in 0..out_ch {
        for j in 0..n_out_sp {
            slice.uni_gates.push(UniGate {
                g: (co * n_out_sp + j) as u64,
                u: (co * block + j + k_len - 1) as u64,
                src: GateSource::Prev,
                sc: sel_one,
            });
        }
    }
    push_layer(layers, ctx, slice, out_ch * n_out_sp);
    Ok(())
}
