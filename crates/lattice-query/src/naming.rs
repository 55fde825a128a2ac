//! Deterministic, collision-free step names

use std::collections::{HashMap, HashSet};

/// Hands out step names unique within one builder
///
/// A hint is returned unchanged the first time it is seen; later requests
/// for the same hint get an increasing `_N` suffix. Names handed out are
/// reserved immediately, so two names created before either step is
/// appended never collide.
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    used: HashSet<String>,
    counters: HashMap<String, usize>,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, hint: &str) -> String {
        let base = sanitize(hint);
        if self.used.insert(base.clone()) {
            return base;
        }
        let counter = self.counters.entry(base.clone()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}", base, counter);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Mark an externally chosen name as taken; false if it already was
    pub fn reserve(&mut self, name: &str) -> bool {
        self.used.insert(name.to_string())
    }
}

/// Lowercase, with anything outside `[a-z0-9_]` folded to `_`
fn sanitize(hint: &str) -> String {
    let cleaned: String = hint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "step".to_string()
    } else {
        trimmed.to_string()
    }
}
