use std::collections::BTreeMap;

use dsr_schemas::ParameterRecord;
use tracing::warn;

/// Lookup of records by normalized parameter key.
#[derive(Debug, Default)]
pub struct KeyIndex<'a> {
    pub by_key: BTreeMap<String, &'a ParameterRecord>,
    /// Records dropped for a blank parameter.
    pub blank: usize,
    /// Keys seen more than once; the later record is the one kept.
    pub collisions: Vec<String>,
}

impl<'a> KeyIndex<'a> {
    pub fn get(&self, key: &str) -> Option<&'a ParameterRecord> {
        self.by_key.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Index `records` by trimmed, lowercased parameter.
///
/// On a key collision the later record replaces the earlier one; the key is
/// recorded in `collisions` and logged.
pub fn build_index<'a>(source: &str, records: &'a [ParameterRecord]) -> KeyIndex<'a> {
    let mut idx = KeyIndex::default();
    for rec in records {
        let Some(key) = rec.key() else {
            idx.blank += 1;
            continue;
        };
        if let Some(prev) = idx.by_key.insert(key.clone(), rec) {
            warn!(
                source = %source,
                key = %key,
                replaced = %prev.identifier,
                kept = %rec.identifier,
                "duplicate parameter key; later record wins"
            );
            idx.collisions.push(key);
        }
    }
    idx
}

/// Three-way split of the key union. Each list is sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub both: Vec<String>,
    pub only_document: Vec<String>,
    pub only_rule: Vec<String>,
}

impl Partition {
    pub fn total(&self) -> usize {
        self.both.len() + self.only_document.len() + self.only_rule.len()
    }
}

pub fn partition(document: &KeyIndex<'_>, rule: &KeyIndex<'_>) -> Partition {
    let mut p = Partition::default();
    // BTreeMap keys iterate sorted, so each list comes out sorted.
    for key in document.by_key.keys() {
        if rule.by_key.contains_key(key) {
            p.both.push(key.clone());
        } else {
            p.only_document.push(key.clone());
        }
    }
    for key in rule.by_key.keys() {
        if !document.by_key.contains_key(key) {
            p.only_rule.push(key.clone());
        }
    }
    p
}
