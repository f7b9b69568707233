//! Set reconciliation for collection-valued sub-attributes
//!
//! Routes and ingress rules come back from the provider in no particular
//! order, with server-assigned fields mixed in. Elements are therefore
//! compared by a content hash over their semantic fields only, with nested
//! lists sorted first, and diffed as sets.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

/// SHA-256 over an element's canonical encoding
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &hex::encode(self.0)[..12])
    }
}

/// Canonical encoder fed by [`SetElement::canonicalize`].
///
/// Every value is written with its field name and length, so `("ab", "c")`
/// and `("a", "bc")` never collide.
pub struct Canonical {
    hasher: Sha256,
}

impl Canonical {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
    }

    fn tag(&mut self, name: &str, tag: u8) {
        self.bytes(name.as_bytes());
        self.hasher.update([tag]);
    }

    pub fn field(&mut self, name: &str, value: &str) -> &mut Self {
        self.tag(name, b's');
        self.bytes(value.as_bytes());
        self
    }

    /// `None` hashes differently from `Some("")`
    pub fn opt_field(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        match value {
            Some(v) => self.field(name, v),
            None => {
                self.tag(name, b'-');
                self
            }
        }
    }

    pub fn int(&mut self, name: &str, value: i64) -> &mut Self {
        self.tag(name, b'i');
        self.hasher.update(value.to_be_bytes());
        self
    }

    pub fn flag(&mut self, name: &str, value: bool) -> &mut Self {
        self.tag(name, b'b');
        self.hasher.update([value as u8]);
        self
    }

    /// Hashes a scalar list as a set: sorted, duplicates dropped
    pub fn sorted_list<I, S>(&mut self, name: &str, items: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
        items.sort();
        items.dedup();

        self.tag(name, b'l');
        self.hasher.update((items.len() as u64).to_be_bytes());
        for item in &items {
            self.bytes(item.as_bytes());
        }
        self
    }

    fn finish(self) -> ContentHash {
        ContentHash(self.hasher.finalize().into())
    }
}

/// A structured sub-resource value that is added and removed independently
pub trait SetElement: Clone + fmt::Debug {
    /// Writes the semantic fields. Server-assigned fields must be left out.
    fn canonicalize(&self, out: &mut Canonical);

    /// Provider-injected elements that users never manage (e.g. the `local` route)
    fn is_intrinsic(&self) -> bool {
        false
    }

    /// Rewrites references to `owner_id` into the element's self marker
    fn normalize_for_owner(self, _owner_id: &str) -> Self {
        self
    }

    fn content_hash(&self) -> ContentHash {
        let mut canonical = Canonical::new();
        self.canonicalize(&mut canonical);
        canonical.finish()
    }
}

/// Drops intrinsic elements. Adapters call this on both sides before [`diff`].
pub fn retain_managed<T: SetElement>(elements: impl IntoIterator<Item = T>) -> Vec<T> {
    elements.into_iter().filter(|e| !e.is_intrinsic()).collect()
}

/// Whether a change adds or removes an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Add,
    Remove,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Add => write!(f, "add"),
            ChangeOp::Remove => write!(f, "remove"),
        }
    }
}

/// One element to add or remove
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub op: ChangeOp,
    pub element: T,
}

impl<T: SetElement> Change<T> {
    /// Mirrors this change onto a locally recorded collection
    pub fn apply_to(&self, recorded: &mut Vec<T>) {
        match self.op {
            ChangeOp::Remove => {
                let hash = self.element.content_hash();
                recorded.retain(|e| e.content_hash() != hash);
            }
            ChangeOp::Add => {
                let hash = self.element.content_hash();
                if !recorded.iter().any(|e| e.content_hash() == hash) {
                    recorded.push(self.element.clone());
                }
            }
        }
    }
}

/// Minimal set of operations turning `observed` into `desired`
#[derive(Debug, Clone)]
pub struct Diff<T> {
    /// In observed order
    pub to_remove: Vec<T>,
    /// In desired order
    pub to_add: Vec<T>,
    pub unchanged: Vec<T>,
}

impl<T: SetElement> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }

    /// Changes in apply order: every removal before any addition.
    ///
    /// Rules that share a narrower identity than their full content (same
    /// port range and protocol, different peers) would otherwise exist twice
    /// for a moment.
    pub fn changes(&self) -> Vec<Change<T>> {
        let removes = self.to_remove.iter().map(|e| Change {
            op: ChangeOp::Remove,
            element: e.clone(),
        });
        let adds = self.to_add.iter().map(|e| Change {
            op: ChangeOp::Add,
            element: e.clone(),
        });
        removes.chain(adds).collect()
    }
}

/// Diffs two collections by content hash.
///
/// `to_remove = observed − desired`, `to_add = desired − observed`,
/// `unchanged = desired ∩ observed`. Duplicates within one side collapse.
pub fn diff<T: SetElement>(desired: &[T], observed: &[T]) -> Diff<T> {
    let desired_hashes: HashSet<ContentHash> = desired.iter().map(|e| e.content_hash()).collect();
    let observed_hashes: HashSet<ContentHash> =
        observed.iter().map(|e| e.content_hash()).collect();

    let mut to_remove = Vec::new();
    let mut seen = HashSet::new();
    for element in observed {
        let hash = element.content_hash();
        if seen.insert(hash) && !desired_hashes.contains(&hash) {
            to_remove.push(element.clone());
        }
    }

    let mut to_add = Vec::new();
    let mut unchanged = Vec::new();
    let mut seen = HashSet::new();
    for element in desired {
        let hash = element.content_hash();
        if !seen.insert(hash) {
            continue;
        }
        if observed_hashes.contains(&hash) {
            unchanged.push(element.clone());
        } else {
            to_add.push(element.clone());
        }
    }

    tracing::debug!(
        "Diff: {} to remove, {} to add, {} unchanged",
        to_remove.len(),
        to_add.len(),
        unchanged.len()
    );

    Diff {
        to_remove,
        to_add,
        unchanged,
    }
}

/// [`diff`] after normalizing references to `owner_id` on both sides
pub fn diff_owned<T: SetElement>(owner_id: &str, desired: &[T], observed: &[T]) -> Diff<T> {
    let normalize = |elements: &[T]| -> Vec<T> {
        elements
            .iter()
            .cloned()
            .map(|e| e.normalize_for_owner(owner_id))
            .collect()
    };
    diff(&normalize(desired), &normalize(observed))
}
