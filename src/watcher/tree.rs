//! The watch-node tree.
//!
//! One node per directory currently registered with the kernel, keyed by
//! watch descriptor. Nodes store only their basename and a parent
//! back-pointer; absolute paths are reconstructed on demand by walking up
//! to the subtree root, which keeps memory proportional to the directory
//! count rather than to total path length. Parent references are plain
//! keys into the same table, never owning pointers.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::hash::Hash;
use std::path::{Path, PathBuf};

/// Dense index into the engine's root table.
pub type RootId = usize;

/// One watched directory.
#[derive(Debug)]
pub struct Node<K> {
    /// Basename of this directory; empty for the root of a subtree.
    pub name: OsString,
    /// Key of the parent node; `None` for a subtree root.
    pub parent: Option<K>,
    /// Children by basename.
    pub kids: BTreeMap<OsString, K>,
    /// Owning root slot.
    pub root: RootId,
}

/// Key-addressed table of all live watch nodes.
#[derive(Debug)]
pub struct WatchTree<K> {
    nodes: HashMap<K, Node<K>>,
}

impl<K: Clone + Eq + Hash> WatchTree<K> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Inserts a node and links it into its parent's child map.
    pub fn insert(&mut self, key: K, name: OsString, parent: Option<K>, root: RootId) {
        if let Some(parent_key) = &parent {
            if let Some(parent_node) = self.nodes.get_mut(parent_key) {
                parent_node.kids.insert(name.clone(), key.clone());
            }
        }
        self.nodes.insert(
            key,
            Node {
                name,
                parent,
                kids: BTreeMap::new(),
                root,
            },
        );
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&Node<K>> {
        self.nodes.get(key)
    }

    pub fn root_of(&self, key: &K) -> Option<RootId> {
        self.nodes.get(key).map(|node| node.root)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reconstructs the absolute path of a node by walking parent
    /// back-pointers up to the subtree root and appending basenames to the
    /// owning root's path.
    pub fn rebuild_path(&self, root_path: &Path, key: &K) -> PathBuf {
        let mut names = Vec::new();
        let mut cursor = Some(key.clone());
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(&current) else {
                break;
            };
            if node.parent.is_some() {
                names.push(node.name.clone());
            }
            cursor = node.parent.clone();
        }
        let mut path = root_path.to_path_buf();
        for name in names.iter().rev() {
            path.push(name);
        }
        path
    }

    /// Detaches the node from its parent and removes it together with all
    /// descendants. Returns the removed keys so the caller can drop the
    /// kernel watches.
    pub fn remove_subtree(&mut self, key: &K) -> Vec<K> {
        match self.nodes.get(key) {
            Some(node) => {
                if let (Some(parent_key), name) = (node.parent.clone(), node.name.clone()) {
                    if let Some(parent_node) = self.nodes.get_mut(&parent_key) {
                        parent_node.kids.remove(&name);
                    }
                }
            }
            None => return Vec::new(),
        }

        let mut removed = Vec::new();
        let mut stack = vec![key.clone()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.kids.into_values());
                removed.push(current);
            }
        }
        removed
    }

    /// Removes every node owned by `root`. Used both for unwatching a
    /// whole root and for abandoning a partially-installed subtree.
    pub fn remove_root(&mut self, root: RootId) -> Vec<K> {
        let keys: Vec<K> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.root == root)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.nodes.remove(key);
        }
        keys
    }
}

impl<K: Clone + Eq + Hash> Default for WatchTree<K> {
    fn default() -> Self {
        Self::new()
    }
}
