use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Produces unique node names from template names
pub trait NodeNameGenerator: Send + Sync {
    fn generate_node_name(&self, template_name: &str) -> String;
}

/// `<template>-<random hex>`; not cryptographic, collisions are negligible per workflow
#[derive(Debug, Clone)]
pub struct RandomSuffixGenerator {
    suffix_length: usize,
}

impl RandomSuffixGenerator {
    pub fn new(suffix_length: usize) -> Self {
        Self {
            suffix_length: suffix_length.clamp(1, 32),
        }
    }
}

impl Default for RandomSuffixGenerator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl NodeNameGenerator for RandomSuffixGenerator {
    fn generate_node_name(&self, template_name: &str) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("{}-{}", template_name, &hex[..self.suffix_length])
    }
}

/// `<template>-0000`, `<template>-0001`, ...; deterministic, handy for replays and tests
#[derive(Debug, Default)]
pub struct SequentialNameGenerator {
    next: AtomicU64,
}

impl SequentialNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeNameGenerator for SequentialNameGenerator {
    fn generate_node_name(&self, template_name: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:04x}", template_name, n)
    }
}
