use ff_ext::{ExtensionField, PoseidonField, SmallField};
use p3_challenger::{CanObserve, FieldChallenger};

use crate::{Challenge, Transcript};

#[derive(Clone)]
pub struct BasicTranscript<E: ExtensionField> {
    challenger: <E::BaseField as PoseidonField>::T,
}

impl<E: ExtensionField> BasicTranscript<E> {
    /// Create a new IOP transcript.
    pub fn new(label: &'static [u8]) -> Self {
        let mut challenger = E::BaseField::get_default_challenger();
        let label_f = E::BaseField::bytes_to_field_elements(label);
        challenger.observe_slice(label_f.as_slice());
        Self { challenger }
    }
}

impl<E: ExtensionField> Transcript<E> for BasicTranscript<E> {
    fn append_message(&mut self, msg: &[u8]) {
        let msg_f = E::BaseField::bytes_to_field_elements(msg);
        self.challenger.observe_slice(msg_f.as_slice());
    }

    fn append_field_elements(&mut self, elements: &[E::BaseField]) {
        self.challenger.observe_slice(elements);
    }

    fn append_field_element_ext(&mut self, element: &E) {
        self.challenger.observe_slice(element.as_limbs());
    }

    fn sample_and_append_challenge(&mut self, label: &'static [u8]) -> Challenge<E> {
        let label_f = E::BaseField::bytes_to_field_elements(label);
        self.challenger.observe_slice(label_f.as_slice());
        Challenge {
            elements: self.challenger.sample_algebra_element(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ff_ext::GoldilocksExt2;
    use p3_field::PrimeCharacteristicRing;

    type E = GoldilocksExt2;

    #[test]
    fn test_deterministic_challenges() {
        let mut ta = BasicTranscript::<E>::new(b"test");
        let mut tb = BasicTranscript::<E>::new(b"test");
        ta.append_field_element_ext(&E::from_u64(42));
        tb.append_field_element_ext(&E::from_u64(42));
        let ca = ta.sample_and_append_challenge(b"round");
        let cb = tb.sample_and_append_challenge(b"round");
        assert_eq!(ca.elements, cb.elements);
    }

    #[test]
    fn test_diverging_transcripts_diverge() {
        let mut ta = BasicTranscript::<E>::new(b"test");
        let mut tb = BasicTranscript::<E>::new(b"test");
        ta.append_field_element_ext(&E::from_u64(1));
        tb.append_field_element_ext(&E::from_u64(2));
        let ca = ta.sample_and_append_challenge(b"round");
        let cb = tb.sample_and_append_challenge(b"round");
        assert_ne!(ca.elements, cb.elements);
    }
}
