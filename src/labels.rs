//! Node Labels
//!
//! Label sources used when growing hierarchy trees. Every node in a build
//! receives a fresh label, and labels never repeat within one source.

use crate::hierarchy::OPEN_VALUE;
use rand::Rng;
use std::collections::HashSet;

/// Supplies unique node labels to the hierarchy builder
pub trait LabelSource {
    fn next_label(&mut self) -> String;
}

/// Uppercase ASCII labels drawn from an injected random source.
///
/// Repeats are rejected, so uniqueness holds by construction rather than
/// relying on the size of the label space.
pub struct RandomLabels<'a, R: Rng + ?Sized> {
    rng: &'a mut R,
    length: usize,
    issued: HashSet<String>,
}

impl<'a, R: Rng + ?Sized> RandomLabels<'a, R> {
    pub const DEFAULT_LENGTH: usize = 10;
    pub const MIN_LENGTH: usize = 5;

    pub fn new(rng: &'a mut R) -> Self {
        Self::with_length(rng, Self::DEFAULT_LENGTH)
    }

    pub fn with_length(rng: &'a mut R, length: usize) -> Self {
        Self {
            rng,
            length: length.max(Self::MIN_LENGTH),
            issued: HashSet::new(),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

impl<R: Rng + ?Sized> LabelSource for RandomLabels<'_, R> {
    fn next_label(&mut self) -> String {
        loop {
            let label: String = (0..self.length)
                .map(|_| self.rng.gen_range(b'A'..=b'Z') as char)
                .collect();
            if label != OPEN_VALUE && self.issued.insert(label.clone()) {
                return label;
            }
        }
    }
}
