#![deny(clippy::cargo)]

use p3_field::{
    ExtensionField as P3ExtensionField, Field as P3Field, PrimeField64, TwoAdicField,
    extension::BinomialExtensionField,
};
use rand_core::RngCore;
use serde::{Serialize, de::DeserializeOwned};

pub mod poseidon;

pub use poseidon::{FieldChallengerExt, PoseidonField};

pub trait SmallField: Serialize + P3Field {
    /// MODULUS as u64
    const MODULUS_U64: u64;

    /// Identifier string
    const NAME: &'static str;

    /// Convert a byte string into a list of field elements
    fn bytes_to_field_elements(bytes: &[u8]) -> Vec<Self>;

    /// Convert a field element to a u64.
    fn to_canonical_u64(&self) -> u64;
}

/// Rejection-sampled uniform field elements, used by tests and random
/// polynomial generators.
pub trait FromUniformBytes: Sized {
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default;

    fn try_from_uniform_bytes(bytes: Self::Bytes) -> Option<Self>;

    fn random(mut rng: impl RngCore) -> Self {
        loop {
            let mut bytes = Self::Bytes::default();
            rng.fill_bytes(bytes.as_mut());
            if let Some(value) = Self::try_from_uniform_bytes(bytes) {
                return value;
            }
        }
    }
}

pub trait ExtensionField:
    P3ExtensionField<Self::BaseField> + FromUniformBytes + Serialize + DeserializeOwned
{
    const DEGREE: usize;

    type BaseField: SmallField
        + PoseidonField
        + FromUniformBytes
        + TwoAdicField
        + PrimeField64
        + Serialize
        + DeserializeOwned;

    fn from_base(base: Self::BaseField) -> Self;

    fn from_limbs(limbs: &[Self::BaseField]) -> Self;

    fn as_limbs(&self) -> &[Self::BaseField];

    /// Convert a field element to a u64 vector
    fn to_canonical_u64_vec(&self) -> Vec<u64>;
}

pub type GoldilocksExt2 = BinomialExtensionField<p3_goldilocks::Goldilocks, 2>;

mod impl_goldilocks {
    use crate::{ExtensionField, FromUniformBytes, GoldilocksExt2, SmallField};
    use p3_field::{
        BasedVectorSpace, PrimeCharacteristicRing, PrimeField64,
        extension::BinomialExtensionField,
    };
    use p3_goldilocks::Goldilocks;

    impl SmallField for Goldilocks {
        const MODULUS_U64: u64 = Self::ORDER_U64;
        const NAME: &'static str = "Goldilocks";

        fn bytes_to_field_elements(bytes: &[u8]) -> Vec<Self> {
            bytes
                .chunks(8)
                .map(|chunk| {
                    let mut array = [0u8; 8];
                    array[..chunk.len()].copy_from_slice(chunk);
                    Self::from_u64(u64::from_le_bytes(array))
                })
                .collect::<Vec<_>>()
        }

        fn to_canonical_u64(&self) -> u64 {
            self.as_canonical_u64()
        }
    }

    impl FromUniformBytes for Goldilocks {
        type Bytes = [u8; 8];

        fn try_from_uniform_bytes(bytes: [u8; 8]) -> Option<Self> {
            let value = u64::from_le_bytes(bytes);
            let is_canonical = value < Self::ORDER_U64;
            is_canonical.then(|| Self::from_u64(value))
        }
    }

    impl FromUniformBytes for GoldilocksExt2 {
        type Bytes = [u8; 16];

        fn try_from_uniform_bytes(bytes: [u8; 16]) -> Option<Self> {
            let limbs = [
                Goldilocks::try_from_uniform_bytes(bytes[0..8].try_into().unwrap())?,
                Goldilocks::try_from_uniform_bytes(bytes[8..16].try_into().unwrap())?,
            ];
            Some(BinomialExtensionField::new_unchecked(limbs))
        }
    }

    impl ExtensionField for GoldilocksExt2 {
        const DEGREE: usize = 2;

        type BaseField = Goldilocks;

        fn from_base(base: Goldilocks) -> Self {
            BinomialExtensionField::new_unchecked([base, Goldilocks::ZERO])
        }

        fn from_limbs(limbs: &[Goldilocks]) -> Self {
            debug_assert_eq!(limbs.len(), 2);
            BinomialExtensionField::new_unchecked([limbs[0], limbs[1]])
        }

        fn as_limbs(&self) -> &[Goldilocks] {
            self.as_basis_coefficients_slice()
        }

        fn to_canonical_u64_vec(&self) -> Vec<u64> {
            self.as_basis_coefficients_slice()
                .iter()
                .map(|v: &Goldilocks| v.as_canonical_u64())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p3_field::PrimeCharacteristicRing;
    use p3_goldilocks::Goldilocks;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn test_from_base_roundtrip() {
        let base = Goldilocks::from_u64(123456789);
        let ext = GoldilocksExt2::from_base(base);
        assert_eq!(ext.as_limbs()[0], base);
        assert_eq!(ext.as_limbs()[1], Goldilocks::ZERO);
        assert_eq!(ext.to_canonical_u64_vec(), vec![123456789, 0]);
    }

    #[test]
    fn test_random_is_reproducible() {
        let a = GoldilocksExt2::random(StdRng::seed_from_u64(7));
        let b = GoldilocksExt2::random(StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
