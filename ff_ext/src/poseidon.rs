use p3_challenger::FieldChallenger;
use p3_field::PrimeField;

use crate::{ExtensionField, SmallField};

pub trait FieldChallengerExt<F: PoseidonField>: FieldChallenger<F> {
    fn observe_ext_slice<E: ExtensionField<BaseField = F>>(&mut self, exts: &[E]) {
        exts.iter()
            .for_each(|ext| self.observe_slice(ext.as_limbs()));
    }

    fn sample_ext_vec<E: ExtensionField<BaseField = F>>(&mut self, n: usize) -> Vec<E> {
        (0..n).map(|_| self.sample_algebra_element()).collect()
    }
}

impl<F: PoseidonField, T: FieldChallenger<F>> FieldChallengerExt<F> for T {}

/// Fixes the permutation and challenger a field uses for Fiat-Shamir.
pub trait PoseidonField: PrimeField + SmallField {
    type P: Clone;
    type T: FieldChallenger<Self> + Clone;
    fn get_default_challenger() -> Self::T;
    fn get_default_perm() -> Self::P;
}

pub(crate) fn new_array<const N: usize, F: PrimeField>(input: [u64; N]) -> [F; N] {
    let mut output = [F::ZERO; N];
    let mut i = 0;
    while i < N {
        output[i] = F::from_u64(input[i]);
        i += 1;
    }
    output
}

mod impl_goldilocks {
    use super::{PoseidonField, new_array};
    use p3_challenger::DuplexChallenger;
    use p3_goldilocks::{
        Goldilocks, HL_GOLDILOCKS_8_EXTERNAL_ROUND_CONSTANTS,
        HL_GOLDILOCKS_8_INTERNAL_ROUND_CONSTANTS, Poseidon2GoldilocksHL,
    };
    use p3_poseidon2::ExternalLayerConstants;

    pub const POSEIDON2_GOLDILOCKS_WIDTH: usize = 8;
    pub const POSEIDON2_GOLDILOCKS_RATE: usize = 4;

    impl PoseidonField for Goldilocks {
        type P = Poseidon2GoldilocksHL<POSEIDON2_GOLDILOCKS_WIDTH>;
        type T = DuplexChallenger<
            Self,
            Self::P,
            POSEIDON2_GOLDILOCKS_WIDTH,
            POSEIDON2_GOLDILOCKS_RATE,
        >;

        fn get_default_challenger() -> Self::T {
            DuplexChallenger::<
                Self,
                Self::P,
                POSEIDON2_GOLDILOCKS_WIDTH,
                POSEIDON2_GOLDILOCKS_RATE,
            >::new(Self::get_default_perm())
        }

        fn get_default_perm() -> Self::P {
            Poseidon2GoldilocksHL::new(
                ExternalLayerConstants::<Goldilocks, POSEIDON2_GOLDILOCKS_WIDTH>::new_from_saved_array(
                    HL_GOLDILOCKS_8_EXTERNAL_ROUND_CONSTANTS,
                    new_array,
                ),
                new_array(HL_GOLDILOCKS_8_INTERNAL_ROUND_CONSTANTS).to_vec(),
            )
        }
    }
}
