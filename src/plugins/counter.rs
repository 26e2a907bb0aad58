//! Keyed tallies shared by the statistics plugins

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::collections::HashMap;
use std::hash::Hash;

/// Sum per key; keys are added on first use
#[derive(Debug, Clone)]
pub struct Counter<K> {
    values: HashMap<K, u64>,
}

impl<K> Default for Counter<K> {
    fn default() -> Self {
        Counter {
            values: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Ord + Clone> Counter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: K, amount: u64) {
        let value = self.values.entry(key).or_default();
        *value = value.saturating_add(amount);
    }

    pub fn add_one(&mut self, key: K) {
        self.add(key, 1);
    }

    pub fn get(&self, key: &K) -> u64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.values.values().fold(0, |sum, v| sum.saturating_add(*v))
    }

    /// The `limit` largest entries (ties by key), plus the sum of the rest
    pub fn top(&self, limit: usize) -> (Vec<(K, u64)>, u64) {
        let mut entries: Vec<(K, u64)> = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let rest = entries
            .iter()
            .skip(limit)
            .fold(0u64, |sum, (_, v)| sum.saturating_add(*v));
        entries.truncate(limit);
        (entries, rest)
    }

    /// Every entry in key order
    pub fn by_key(&self) -> Vec<(K, u64)> {
        let mut entries: Vec<(K, u64)> = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Two-column summary table in the style every plugin prints
pub fn summary_table(title: &str, value_header: &str) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![title, value_header]);
    table
}
