#![deny(clippy::cargo)]

use ff_ext::ExtensionField;
use serde::{Deserialize, Serialize};

mod basic;

pub use basic::BasicTranscript;

/// A challenge sampled from the transcript.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge<E> {
    pub elements: E,
}

/// The Fiat-Shamir transcript of an interactive proof: absorbs every prover
/// message and derives each round's challenge deterministically from the
/// messages absorbed so far.
pub trait Transcript<E: ExtensionField> {
    /// Append a byte message to the transcript.
    fn append_message(&mut self, msg: &[u8]);

    /// Append base field elements to the transcript.
    fn append_field_elements(&mut self, elements: &[E::BaseField]);

    /// Append an extension field element to the transcript.
    fn append_field_element_ext(&mut self, element: &E);

    fn append_field_element_exts(&mut self, elements: &[E]) {
        for e in elements {
            self.append_field_element_ext(e);
        }
    }

    /// Generate a challenge from the current transcript and append it to the
    /// transcript. The label provides domain separation between the protocol
    /// steps.
    fn sample_and_append_challenge(&mut self, label: &'static [u8]) -> Challenge<E>;

    /// Sample a vector of challenges under one label.
    fn sample_and_append_vec(&mut self, label: &'static [u8], n: usize) -> Vec<E> {
        (0..n)
            .map(|_| self.sample_and_append_challenge(label).elements)
            .collect()
    }
}
