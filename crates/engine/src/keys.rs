//! Per-document key indexes, built on first use by a key program.

use crate::error::TransformError;
use crate::trees::{NodeRef, TreeId};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// A key program is walking the document.
    Building,
    Ready,
}

#[derive(Debug)]
struct KeyTable {
    state: KeyState,
    entries: BTreeMap<String, Vec<NodeRef>>,
}

/// Maps (key name, document, value) to nodes in document order.
///
/// Adding the same node under the same value twice has no effect, so a
/// walk that is interrupted and repeated leaves the same table.
#[derive(Debug, Default)]
pub struct KeyIndex {
    tables: HashMap<(String, TreeId), KeyTable>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, name: &str, tree: TreeId) -> Option<KeyState> {
        self.tables
            .get(&(name.to_string(), tree))
            .map(|table| table.state)
    }

    /// Starts building the index for `name` over `tree`. Returns `false` if
    /// it exists already.
    pub fn begin(&mut self, name: &str, tree: TreeId) -> bool {
        let key = (name.to_string(), tree);
        if self.tables.contains_key(&key) {
            return false;
        }
        self.tables.insert(
            key,
            KeyTable {
                state: KeyState::Building,
                entries: BTreeMap::new(),
            },
        );
        true
    }

    pub fn add(
        &mut self,
        name: &str,
        tree: TreeId,
        value: String,
        node: NodeRef,
    ) -> Result<(), TransformError> {
        let table = self
            .tables
            .entry((name.to_string(), tree))
            .or_insert_with(|| KeyTable {
                state: KeyState::Building,
                entries: BTreeMap::new(),
            });
        let nodes = table.entries.entry(value).or_default();
        if let Err(position) = nodes.binary_search(&node) {
            nodes.try_reserve(1)?;
            nodes.insert(position, node);
        }
        Ok(())
    }

    pub fn finish(&mut self, name: &str, tree: TreeId) {
        if let Some(table) = self.tables.get_mut(&(name.to_string(), tree)) {
            table.state = KeyState::Ready;
            log::debug!(
                "Key '{}' indexed {} values for tree {}",
                name,
                table.entries.len(),
                tree.index()
            );
        }
    }

    /// Nodes with `value` for key `name` in `tree`, in document order.
    pub fn lookup(&self, name: &str, tree: TreeId, value: &str) -> &[NodeRef] {
        self.tables
            .get(&(name.to_string(), tree))
            .and_then(|table| table.entries.get(value))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
