// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Content hashing for cache signatures
//!
//! Uses BLAKE3 for fast, secure content hashing.

use blake3::Hasher;

use crate::errors::CacheError;
use crate::pipeline::{ResolvedInputs, Step};

/// Hasher for step cache signatures
pub struct SignatureHasher {
    hasher: Hasher,
}

impl SignatureHasher {
    /// Create a new signature hasher
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Signature of one step execution: kind, code identity and resolved inputs
    ///
    /// The step id is deliberately left out so that renaming a step keeps its
    /// cache entries usable.
    pub fn hash_step(mut self, step: &Step, resolved: &ResolvedInputs) -> Result<String, CacheError> {
        self.field("kind", step.kind_name());

        let program = step
            .program()
            .ok_or_else(|| CacheError::new(format!("step '{}' runs no program", step.id)))?;
        self.field("code", &program.code_identity());

        let inputs = serde_json::to_string(&resolved.inputs)
            .map_err(|e| CacheError::new(format!("failed to serialize inputs: {}", e)))?;
        self.field("inputs", &inputs);

        let hyperparameters = serde_json::to_string(&resolved.hyperparameters)
            .map_err(|e| CacheError::new(format!("failed to serialize hyperparameters: {}", e)))?;
        self.field("hyperparameters", &hyperparameters);

        for output in &step.outputs {
            self.field("output", &format!("{}:{}", output.name, output.content_type));
        }

        Ok(self.finalize())
    }

    /// Hash a named field; the separators keep `("ab", "c")` and `("a", "bc")` apart
    pub fn field(&mut self, name: &str, value: &str) {
        self.hasher.update(name.as_bytes());
        self.hasher.update(&[0]);
        self.hasher.update(value.as_bytes());
        self.hasher.update(&[0]);
    }

    /// Hash arbitrary bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finalize and get the hash
    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for SignatureHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a quick hash of a string
pub fn hash_string(s: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(s.as_bytes());
    hasher.finalize().to_hex().to_string()
}
