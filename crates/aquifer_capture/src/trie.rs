//! Requested-run name index.
//!
//! A prefix trie over every known reference name, rebuilt wholesale on each
//! refresh. Lookups and rebuilds share one mutex, so a lookup never
//! observes a half-built structure.
//!
//! Instrument file names routinely carry suffixes the requested run does
//! not (`Sample_B_01_run3.raw` for run `Sample_B_01`), so a lookup returns
//! the deepest stored name that is a prefix of the candidate. A failed
//! lookup reports how deep the walk got: a deep failure means several
//! reference records were plausible (ambiguous), a shallow one means the
//! name is simply unknown.

use aquifer_protocol::ReferenceRunRecord;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// Outcome of a name lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum TrieLookup {
    /// Exactly one reference name is a prefix of the candidate; the
    /// deepest such record is returned.
    Exact(ReferenceRunRecord),
    /// The walk failed at or beyond the ambiguity depth - several records
    /// share a long common prefix with the candidate.
    Ambiguous { depth: usize },
    /// The walk failed shallow - no plausible record.
    NoMatch { depth: usize },
}

#[derive(Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    /// Index into `TrieIndex::records` when a reference name ends here.
    record: Option<usize>,
}

impl TrieNode {
    fn insert(&mut self, name: &str, index: usize) {
        let mut node = self;
        for ch in name.chars() {
            node = node.children.entry(ch).or_default();
        }
        node.record = Some(index);
    }
}

struct TrieIndex {
    root: TrieNode,
    records: Vec<ReferenceRunRecord>,
    built_at: Option<DateTime<Utc>>,
}

/// Shared, rebuild-safe matcher over the requested-run snapshot.
pub struct RunMatcher {
    inner: Mutex<TrieIndex>,
    ambiguity_depth: usize,
}

impl RunMatcher {
    pub fn new(ambiguity_depth: usize) -> Self {
        Self {
            inner: Mutex::new(TrieIndex {
                root: TrieNode::default(),
                records: Vec::new(),
                built_at: None,
            }),
            ambiguity_depth,
        }
    }

    /// Replace the whole index with a fresh snapshot.
    pub fn rebuild(&self, records: Vec<ReferenceRunRecord>) {
        let mut root = TrieNode::default();
        for (index, record) in records.iter().enumerate() {
            root.insert(&record.dataset_name.to_lowercase(), index);
        }
        let count = records.len();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.root = root;
        inner.records = records;
        inner.built_at = Some(Utc::now());
        info!(records = count, "Rebuilt requested-run index");
    }

    /// Walk the candidate name through the trie.
    pub fn find(&self, candidate_name: &str) -> TrieLookup {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut node = &inner.root;
        let mut depth = 0usize;
        let mut deepest_record: Option<usize> = node.record;

        for ch in candidate_name.to_lowercase().chars() {
            match node.children.get(&ch) {
                Some(child) => {
                    node = child;
                    depth += 1;
                    if child.record.is_some() {
                        deepest_record = child.record;
                    }
                }
                None => break,
            }
        }

        if let Some(index) = deepest_record {
            return TrieLookup::Exact(inner.records[index].clone());
        }
        if depth >= self.ambiguity_depth {
            TrieLookup::Ambiguous { depth }
        } else {
            TrieLookup::NoMatch { depth }
        }
    }

    /// When the index was last rebuilt, if ever.
    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).built_at
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
