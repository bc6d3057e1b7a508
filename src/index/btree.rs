//! Arena B+-tree over `(key, record number)` entries
//!
//! Nodes live in a `Vec` and refer to each other by index. Leaves hold the
//! entries and are chained left to right through `next_leaf`; internal nodes
//! hold separators (the first entry of the right sibling at split time).
//!
//! Entries are ordered by key bytes, then record number, so duplicate keys
//! keep a stable order and an erase always removes exactly one entry.
//! Erase never merges nodes: leaves may become empty and stay in the chain.
//!
//! # Persistence Format
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ "XBPT" | order u32 | root u32 | nodes u32│
//! ├──────────────────────────────────────────┤
//! │ per node:                                │
//! │   leaf u8 | next_leaf u32 | count u32    │
//! │   count × (key_len u32 | key bytes)      │
//! │   count × recno u32                      │
//! │   internal only: children u32 | ids u32  │
//! └──────────────────────────────────────────┘
//! ```
//! All integers little-endian; `0xFFFFFFFF` marks "no next leaf".

use crate::index::codec::ByteKey;
use crate::storage::{StorageError, StorageResult};

/// Default branching factor
pub const DEFAULT_ORDER: usize = 64;

/// Smallest accepted branching factor
pub const MIN_ORDER: usize = 4;

const TREE_MAGIC: &[u8; 4] = b"XBPT";
const NO_NODE: u32 = u32::MAX;

type NodeId = usize;

/// One indexed entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    pub key: ByteKey,
    pub recno: u32,
}

impl Entry {
    pub fn new(key: ByteKey, recno: u32) -> Self {
        Self { key, recno }
    }
}

#[derive(Debug, Clone)]
struct Node {
    leaf: bool,
    /// Entries (leaf) or separators (internal)
    entries: Vec<Entry>,
    children: Vec<NodeId>,
    next_leaf: Option<NodeId>,
}

impl Node {
    fn leaf(entries: Vec<Entry>) -> Self {
        Self {
            leaf: true,
            entries,
            children: Vec::new(),
            next_leaf: None,
        }
    }

    fn internal(separators: Vec<Entry>, children: Vec<NodeId>) -> Self {
        Self {
            leaf: false,
            entries: separators,
            children,
            next_leaf: None,
        }
    }
}

/// Position of an entry: leaf node and slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    leaf: NodeId,
    slot: usize,
}

enum InsertOutcome {
    Duplicate,
    Done,
    Split(Entry, NodeId),
}

/// Ordered multimap from key bytes to record numbers
#[derive(Debug, Clone)]
pub struct BTree {
    order: usize,
    nodes: Vec<Node>,
    root: NodeId,
    len: usize,
}

impl Default for BTree {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER)
    }
}

impl BTree {
    /// Empty tree; `order` is raised to [`MIN_ORDER`] if smaller
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(MIN_ORDER),
            nodes: vec![Node::leaf(Vec::new())],
            root: 0,
            len: 0,
        }
    }

    /// Build from entries in one pass (sorted and de-duplicated first)
    pub fn bulk_load(order: usize, mut entries: Vec<Entry>) -> Self {
        let mut tree = Self::new(order);
        if entries.is_empty() {
            return tree;
        }

        entries.sort();
        entries.dedup();
        tree.len = entries.len();
        tree.nodes.clear();

        // Leaf level, chained left to right
        let mut level: Vec<(NodeId, Entry)> = Vec::new();
        let mut iter = entries.into_iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<Entry> = iter.by_ref().take(tree.order).collect();
            let first = chunk[0].clone();
            let id = tree.alloc(Node::leaf(chunk));
            if let Some(&(prev, _)) = level.last() {
                tree.nodes[prev].next_leaf = Some(id);
            }
            level.push((id, first));
        }

        // Internal levels until a single root remains
        while level.len() > 1 {
            let mut upper = Vec::new();
            for chunk in level.chunks(tree.order + 1) {
                let separators = chunk[1..].iter().map(|(_, min)| min.clone()).collect();
                let children = chunk.iter().map(|(id, _)| *id).collect();
                let id = tree.alloc(Node::internal(separators, children));
                upper.push((id, chunk[0].1.clone()));
            }
            level = upper;
        }

        tree.root = level[0].0;
        tree
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Levels from root to leaves (1 for a lone leaf)
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut node = self.root;
        while !self.nodes[node].leaf {
            node = self.nodes[node].children[0];
            height += 1;
        }
        height
    }

    /// Allocated nodes, empty leaves included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ==================== Mutation ====================

    /// Insert an entry; returns false if the exact entry already exists
    pub fn insert(&mut self, key: ByteKey, recno: u32) -> bool {
        let entry = Entry::new(key, recno);
        match self.insert_into(self.root, entry) {
            InsertOutcome::Duplicate => false,
            InsertOutcome::Done => {
                self.len += 1;
                true
            }
            InsertOutcome::Split(separator, right) => {
                let old_root = self.root;
                self.root = self.alloc(Node::internal(vec![separator], vec![old_root, right]));
                self.len += 1;
                tracing::debug!("Root split, tree height now {}", self.height());
                true
            }
        }
    }

    fn insert_into(&mut self, node: NodeId, entry: Entry) -> InsertOutcome {
        if self.nodes[node].leaf {
            let entries = &mut self.nodes[node].entries;
            let slot = match entries.binary_search(&entry) {
                Ok(_) => return InsertOutcome::Duplicate,
                Err(slot) => slot,
            };
            entries.insert(slot, entry);
            if entries.len() > self.order {
                return self.split_leaf(node);
            }
            return InsertOutcome::Done;
        }

        let idx = self.nodes[node].entries.partition_point(|s| s <= &entry);
        let child = self.nodes[node].children[idx];

        match self.insert_into(child, entry) {
            InsertOutcome::Split(separator, right) => {
                let n = &mut self.nodes[node];
                n.entries.insert(idx, separator);
                n.children.insert(idx + 1, right);
                if n.children.len() > self.order + 1 {
                    self.split_internal(node)
                } else {
                    InsertOutcome::Done
                }
            }
            other => other,
        }
    }

    fn split_leaf(&mut self, node: NodeId) -> InsertOutcome {
        let mid = self.nodes[node].entries.len() / 2;
        let right_entries = self.nodes[node].entries.split_off(mid);
        let separator = right_entries[0].clone();

        let mut right = Node::leaf(right_entries);
        right.next_leaf = self.nodes[node].next_leaf;
        let right = self.alloc(right);
        self.nodes[node].next_leaf = Some(right);

        InsertOutcome::Split(separator, right)
    }

    fn split_internal(&mut self, node: NodeId) -> InsertOutcome {
        let n = &mut self.nodes[node];
        let mid = n.entries.len() / 2;
        let mut right_separators = n.entries.split_off(mid);
        let separator = right_separators.remove(0);
        let right_children = n.children.split_off(mid + 1);

        let right = self.alloc(Node::internal(right_separators, right_children));
        InsertOutcome::Split(separator, right)
    }

    /// Remove the exact `(key, recno)` entry
    pub fn erase(&mut self, key: &ByteKey, recno: u32) -> bool {
        let cursor = match self.lower_bound_by(|e| (&e.key, e.recno) < (key, recno)) {
            Some(c) => c,
            None => return false,
        };

        let entry = &self.nodes[cursor.leaf].entries[cursor.slot];
        if entry.key != *key || entry.recno != recno {
            return false;
        }

        self.nodes[cursor.leaf].entries.remove(cursor.slot);
        self.len -= 1;
        self.collapse_root();
        true
    }

    /// Remove the first entry for `recno` by scanning the leaf chain
    pub fn erase_recno(&mut self, recno: u32) -> Option<ByteKey> {
        let mut leaf = Some(self.leftmost_leaf());
        while let Some(id) = leaf {
            if let Some(slot) = self.nodes[id].entries.iter().position(|e| e.recno == recno) {
                let entry = self.nodes[id].entries.remove(slot);
                self.len -= 1;
                self.collapse_root();
                return Some(entry.key);
            }
            leaf = self.nodes[id].next_leaf;
        }
        None
    }

    fn collapse_root(&mut self) {
        while !self.nodes[self.root].leaf && self.nodes[self.root].children.len() == 1 {
            self.root = self.nodes[self.root].children[0];
        }
    }

    // ==================== Search ====================

    fn leftmost_leaf(&self) -> NodeId {
        let mut node = self.root;
        while !self.nodes[node].leaf {
            node = self.nodes[node].children[0];
        }
        node
    }

    /// First entry for which `less` is false (`less` must be monotone)
    fn lower_bound_by<F>(&self, less: F) -> Option<Cursor>
    where
        F: Fn(&Entry) -> bool,
    {
        let mut node = self.root;
        while !self.nodes[node].leaf {
            let n = &self.nodes[node];
            let idx = n.entries.partition_point(|s| less(s));
            node = n.children[idx];
        }
        let slot = self.nodes[node].entries.partition_point(|e| less(e));
        self.settle(node, slot)
    }

    /// Last entry for which `less` is true
    fn last_where<F>(&self, node: NodeId, less: &F) -> Option<Cursor>
    where
        F: Fn(&Entry) -> bool,
    {
        let n = &self.nodes[node];
        if n.leaf {
            let slot = n.entries.partition_point(|e| less(e));
            return slot.checked_sub(1).map(|slot| Cursor { leaf: node, slot });
        }

        let idx = n.entries.partition_point(|s| less(s));
        (0..=idx)
            .rev()
            .find_map(|i| self.last_where(n.children[i], less))
    }

    /// Skip forward past exhausted or empty leaves
    fn settle(&self, mut leaf: NodeId, mut slot: usize) -> Option<Cursor> {
        loop {
            if slot < self.nodes[leaf].entries.len() {
                return Some(Cursor { leaf, slot });
            }
            leaf = self.nodes[leaf].next_leaf?;
            slot = 0;
        }
    }

    fn entry_at(&self, cursor: Cursor) -> &Entry {
        &self.nodes[cursor.leaf].entries[cursor.slot]
    }

    /// Smallest entry with key ≥ `key`
    pub fn seek_ge(&self, key: &ByteKey) -> Option<&Entry> {
        self.lower_bound_by(|e| &e.key < key).map(|c| self.entry_at(c))
    }

    /// Smallest entry with key > `key`
    pub fn seek_gt(&self, key: &ByteKey) -> Option<&Entry> {
        self.lower_bound_by(|e| &e.key <= key).map(|c| self.entry_at(c))
    }

    /// Largest entry with key < `key`
    pub fn seek_lt(&self, key: &ByteKey) -> Option<&Entry> {
        self.last_where(self.root, &|e: &Entry| &e.key < key)
            .map(|c| self.entry_at(c))
    }

    /// Largest entry with key ≤ `key`
    pub fn seek_le(&self, key: &ByteKey) -> Option<&Entry> {
        self.last_where(self.root, &|e: &Entry| &e.key <= key)
            .map(|c| self.entry_at(c))
    }

    /// Entry immediately after `(key, recno)` in tree order
    pub fn next_after(&self, key: &ByteKey, recno: u32) -> Option<&Entry> {
        self.lower_bound_by(|e| (&e.key, e.recno) <= (key, recno))
            .map(|c| self.entry_at(c))
    }

    /// Entry immediately before `(key, recno)` in tree order
    pub fn prev_before(&self, key: &ByteKey, recno: u32) -> Option<&Entry> {
        self.last_where(self.root, &|e: &Entry| (&e.key, e.recno) < (key, recno))
            .map(|c| self.entry_at(c))
    }

    pub fn contains(&self, key: &ByteKey, recno: u32) -> bool {
        self.lower_bound_by(|e| (&e.key, e.recno) < (key, recno))
            .map(|c| {
                let e = self.entry_at(c);
                e.key == *key && e.recno == recno
            })
            .unwrap_or(false)
    }

    pub fn first(&self) -> Option<&Entry> {
        self.settle(self.leftmost_leaf(), 0).map(|c| self.entry_at(c))
    }

    pub fn last(&self) -> Option<&Entry> {
        self.last_where(self.root, &|_: &Entry| true)
            .map(|c| self.entry_at(c))
    }

    /// Entries in ascending order along the leaf chain
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            tree: self,
            cursor: self.settle(self.leftmost_leaf(), 0),
        }
    }

    // ==================== Validation ====================

    /// Check structural invariants
    pub fn validate(&self) -> StorageResult<()> {
        if self.root >= self.nodes.len() {
            return Err(corrupt(format!("root {} out of range", self.root)));
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        self.check_node(
            self.root,
            (None, None),
            1,
            &mut visited,
            &mut leaf_depth,
            &mut leaves,
        )?;

        // Leaf chain visits exactly the leaves in key order
        let mut chained = Vec::with_capacity(leaves.len());
        let mut leaf = Some(leaves[0]);
        while let Some(id) = leaf {
            if chained.len() >= leaves.len() {
                return Err(corrupt("leaf chain longer than the tree".into()));
            }
            chained.push(id);
            leaf = self.nodes[id].next_leaf;
            if leaf.map_or(false, |next| next >= self.nodes.len()) {
                return Err(corrupt("leaf chain points outside the arena".into()));
            }
        }
        if chained != leaves {
            return Err(corrupt("leaf chain does not match tree order".into()));
        }

        let mut count = 0;
        let mut prev: Option<&Entry> = None;
        for entry in leaves.iter().flat_map(|&id| self.nodes[id].entries.iter()) {
            if prev.map_or(false, |p| p >= entry) {
                return Err(corrupt("leaf entries out of order".into()));
            }
            prev = Some(entry);
            count += 1;
        }
        if count != self.len {
            return Err(corrupt(format!(
                "entry count {} does not match recorded length {}",
                count, self.len
            )));
        }

        Ok(())
    }

    fn check_node(
        &self,
        id: NodeId,
        bounds: (Option<&Entry>, Option<&Entry>),
        depth: usize,
        visited: &mut [bool],
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<NodeId>,
    ) -> StorageResult<()> {
        if id >= self.nodes.len() {
            return Err(corrupt(format!("child id {} out of range", id)));
        }
        if visited[id] {
            return Err(corrupt(format!("node {} reachable twice", id)));
        }
        visited[id] = true;

        let node = &self.nodes[id];
        let (lo, hi) = bounds;

        if node.entries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt(format!("node {} entries not strictly sorted", id)));
        }
        for entry in &node.entries {
            if lo.map_or(false, |lo| entry < lo) || hi.map_or(false, |hi| entry >= hi) {
                return Err(corrupt(format!("node {} entry outside separator range", id)));
            }
        }

        if node.leaf {
            if !node.children.is_empty() || node.entries.len() > self.order {
                return Err(corrupt(format!("leaf {} malformed", id)));
            }
            match leaf_depth {
                Some(d) if *d != depth => {
                    return Err(corrupt(format!("leaf {} at uneven depth", id)));
                }
                Some(_) => {}
                None => *leaf_depth = Some(depth),
            }
            leaves.push(id);
            return Ok(());
        }

        if node.children.len() != node.entries.len() + 1 || node.children.len() > self.order + 1 {
            return Err(corrupt(format!(
                "internal node {} has {} children for {} separators",
                id,
                node.children.len(),
                node.entries.len()
            )));
        }

        let last = node.children.len() - 1;
        for (i, &child) in node.children.iter().enumerate() {
            let child_lo = if i == 0 { lo } else { Some(&node.entries[i - 1]) };
            let child_hi = if i == last { hi } else { Some(&node.entries[i]) };
            self.check_node(child, (child_lo, child_hi), depth + 1, visited, leaf_depth, leaves)?;
        }
        Ok(())
    }

    // ==================== Persistence ====================

    /// Serialize the tree
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(TREE_MAGIC);
        put_u32(&mut buf, self.order as u32);
        put_u32(&mut buf, self.root as u32);
        put_u32(&mut buf, self.nodes.len() as u32);

        for node in &self.nodes {
            buf.push(node.leaf as u8);
            put_u32(&mut buf, node.next_leaf.map_or(NO_NODE, |n| n as u32));
            put_u32(&mut buf, node.entries.len() as u32);
            for entry in &node.entries {
                put_u32(&mut buf, entry.key.len() as u32);
                buf.extend_from_slice(entry.key.as_bytes());
            }
            for entry in &node.entries {
                put_u32(&mut buf, entry.recno);
            }
            if !node.leaf {
                put_u32(&mut buf, node.children.len() as u32);
                for &child in &node.children {
                    put_u32(&mut buf, child as u32);
                }
            }
        }
        buf
    }

    /// Deserialize and validate a tree
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let mut r = ByteReader::new(bytes);

        if r.take(4)? != TREE_MAGIC {
            return Err(corrupt("bad tree magic".into()));
        }
        let order = r.u32()? as usize;
        let root = r.u32()? as usize;
        let node_count = r.u32()? as usize;

        if order < MIN_ORDER {
            return Err(corrupt(format!("order {} below minimum", order)));
        }
        // Every node takes at least 9 bytes
        if node_count == 0 || node_count > r.remaining() / 9 {
            return Err(corrupt(format!("implausible node count {}", node_count)));
        }
        if root >= node_count {
            return Err(corrupt(format!("root {} out of range", root)));
        }

        let mut nodes = Vec::with_capacity(node_count);
        let mut len = 0;
        for _ in 0..node_count {
            let leaf = match r.u8()? {
                0 => false,
                1 => true,
                other => return Err(corrupt(format!("bad leaf flag {}", other))),
            };
            let next_leaf = match r.u32()? {
                NO_NODE => None,
                n if (n as usize) < node_count => Some(n as usize),
                n => return Err(corrupt(format!("next leaf {} out of range", n))),
            };

            let count = r.u32()? as usize;
            if count > r.remaining() / 8 {
                return Err(corrupt(format!("implausible entry count {}", count)));
            }
            let mut keys = Vec::with_capacity(count);
            for _ in 0..count {
                let key_len = r.u32()? as usize;
                keys.push(ByteKey(r.take(key_len)?.to_vec()));
            }
            let mut entries = Vec::with_capacity(count);
            for key in keys {
                entries.push(Entry::new(key, r.u32()?));
            }

            let mut children = Vec::new();
            if leaf {
                len += entries.len();
            } else {
                let child_count = r.u32()? as usize;
                if child_count > r.remaining() / 4 {
                    return Err(corrupt(format!("implausible child count {}", child_count)));
                }
                for _ in 0..child_count {
                    let child = r.u32()? as usize;
                    if child >= node_count {
                        return Err(corrupt(format!("child {} out of range", child)));
                    }
                    children.push(child);
                }
            }

            nodes.push(Node {
                leaf,
                entries,
                children,
                next_leaf,
            });
        }

        if r.remaining() != 0 {
            return Err(corrupt(format!("{} trailing bytes after tree", r.remaining())));
        }

        let tree = Self {
            order,
            nodes,
            root,
            len,
        };

        // Orphaned nodes (left behind by root collapse) are allowed, but
        // reachable leaves must account for every stored entry
        tree.validate()?;
        Ok(tree)
    }
}

/// Ascending iterator over a [`BTree`]
pub struct Iter<'a> {
    tree: &'a BTree,
    cursor: Option<Cursor>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor?;
        let entry = self.tree.entry_at(cursor);
        self.cursor = self.tree.settle(cursor.leaf, cursor.slot + 1);
        Some(entry)
    }
}

fn corrupt(msg: String) -> StorageError {
    StorageError::CorruptIndex(msg)
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Bounds-checked little-endian reader; running short is index corruption
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> StorageResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(corrupt(format!(
                "truncated: wanted {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> StorageResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn key(s: &str) -> ByteKey {
        ByteKey::from(s)
    }

    /// Deterministic pseudo-random sequence
    fn lcg(seed: &mut u64) -> u64 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *seed >> 33
    }

    fn random_tree(order: usize, n: u32) -> (BTree, BTreeSet<(Vec<u8>, u32)>) {
        let mut tree = BTree::new(order);
        let mut model = BTreeSet::new();
        let mut seed = 42;
        for recno in 1..=n {
            let k = format!("{:04}", lcg(&mut seed) % 500);
            assert!(tree.insert(key(&k), recno));
            model.insert((k.into_bytes(), recno));
        }
        (tree, model)
    }

    fn contents(tree: &BTree) -> Vec<(Vec<u8>, u32)> {
        tree.iter().map(|e| (e.key.0.clone(), e.recno)).collect()
    }

    #[test]
    fn test_insert_keeps_order_and_invariants() {
        let (tree, model) = random_tree(4, 1000);
        tree.validate().unwrap();
        assert_eq!(tree.len(), 1000);
        assert!(tree.height() > 2);
        assert_eq!(contents(&tree), model.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_duplicate_keys_ordered_by_recno() {
        let mut tree = BTree::new(4);
        for recno in [5, 3, 9, 1, 7, 2, 8] {
            tree.insert(key("SAME"), recno);
        }
        assert!(!tree.insert(key("SAME"), 3));
        let recnos: Vec<u32> = tree.iter().map(|e| e.recno).collect();
        assert_eq!(recnos, vec![1, 2, 3, 5, 7, 8, 9]);
        tree.validate().unwrap();

        assert!(tree.erase(&key("SAME"), 5));
        assert!(!tree.erase(&key("SAME"), 5));
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.seek_ge(&key("SAME")).map(|e| e.recno), Some(1));
    }

    #[test]
    fn test_seek_ge_matches_model() {
        let (tree, model) = random_tree(5, 600);
        for target in 0..520 {
            let k = format!("{:04}", target);
            let expected = model
                .iter()
                .find(|(mk, _)| mk.as_slice() >= k.as_bytes())
                .map(|(_, r)| *r);
            assert_eq!(tree.seek_ge(&key(&k)).map(|e| e.recno), expected, "target {}", k);

            let expected_lt = model
                .iter()
                .rev()
                .find(|(mk, _)| mk.as_slice() < k.as_bytes())
                .map(|(_, r)| *r);
            assert_eq!(tree.seek_lt(&key(&k)).map(|e| e.recno), expected_lt, "target {}", k);
        }
    }

    #[test]
    fn test_erase_without_merge() {
        let (mut tree, mut model) = random_tree(4, 800);
        let victims: Vec<_> = model.iter().step_by(2).cloned().collect();
        for (k, recno) in &victims {
            assert!(tree.erase(&ByteKey(k.clone()), *recno));
            model.remove(&(k.clone(), *recno));
        }
        tree.validate().unwrap();
        assert_eq!(tree.len(), model.len());
        assert_eq!(contents(&tree), model.iter().cloned().collect::<Vec<_>>());

        // Empty every leaf; searches walk past the empty ones
        let rest: Vec<_> = model.iter().cloned().collect();
        for (k, recno) in rest {
            assert!(tree.erase(&ByteKey(k), recno));
        }
        tree.validate().unwrap();
        assert!(tree.is_empty());
        assert!(tree.first().is_none());
        assert!(tree.last().is_none());
        assert!(tree.seek_ge(&key("0000")).is_none());
    }

    #[test]
    fn test_erase_recno_scans_chain() {
        let mut tree = BTree::new(4);
        for (i, k) in ["d", "b", "a", "c", "e", "f"].iter().enumerate() {
            tree.insert(key(k), i as u32 + 1);
        }
        assert_eq!(tree.erase_recno(4), Some(key("c")));
        assert_eq!(tree.erase_recno(4), None);
        assert!(!tree.contains(&key("c"), 4));
        tree.validate().unwrap();
    }

    #[test]
    fn test_stepping_and_bounds() {
        let mut tree = BTree::new(4);
        for (i, k) in ["b", "a", "c", "b"].iter().enumerate() {
            tree.insert(key(k), i as u32 + 1);
        }
        // Order: (a,2) (b,1) (b,4) (c,3)
        assert_eq!(tree.first().map(|e| e.recno), Some(2));
        assert_eq!(tree.last().map(|e| e.recno), Some(3));
        assert_eq!(tree.next_after(&key("b"), 1).map(|e| e.recno), Some(4));
        assert_eq!(tree.prev_before(&key("b"), 1).map(|e| e.recno), Some(2));
        assert!(tree.next_after(&key("c"), 3).is_none());
        assert_eq!(tree.seek_le(&key("b")).map(|e| e.recno), Some(4));
        assert_eq!(tree.seek_gt(&key("b")).map(|e| e.recno), Some(3));
        assert!(tree.seek_ge(&key("d")).is_none());
    }

    #[test]
    fn test_bulk_load_equals_incremental() {
        let (tree, model) = random_tree(6, 700);
        let mut entries: Vec<Entry> = tree.iter().cloned().collect();
        entries.reverse();
        let bulk = BTree::bulk_load(6, entries);
        bulk.validate().unwrap();
        assert_eq!(contents(&bulk), model.into_iter().collect::<Vec<_>>());

        let mut bulk = bulk;
        assert!(bulk.insert(key("0250"), 10_000));
        bulk.validate().unwrap();

        let empty = BTree::bulk_load(6, Vec::new());
        assert!(empty.is_empty());
        empty.validate().unwrap();
    }

    #[test]
    fn test_persistence_roundtrip() {
        let (mut tree, _) = random_tree(4, 300);
        for recno in 1..=50 {
            tree.erase_recno(recno);
        }
        let restored = BTree::from_bytes(&tree.to_bytes()).unwrap();
        assert_eq!(restored.len(), tree.len());
        assert_eq!(restored.order(), 4);
        assert_eq!(contents(&restored), contents(&tree));
    }

    #[test]
    fn test_load_rejects_corruption() {
        let (tree, _) = random_tree(4, 100);
        let bytes = tree.to_bytes();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'Z';
        assert!(matches!(BTree::from_bytes(&bad_magic), Err(StorageError::CorruptIndex(_))));

        let mut bad_root = bytes.clone();
        bad_root[8..12].copy_from_slice(&9999u32.to_le_bytes());
        assert!(BTree::from_bytes(&bad_root).is_err());

        assert!(BTree::from_bytes(&bytes[..bytes.len() - 3]).is_err());

        let mut trailing = bytes;
        trailing.push(0);
        assert!(BTree::from_bytes(&trailing).is_err());
    }

    #[test]
    fn test_minimum_order() {
        let tree = BTree::new(1);
        assert_eq!(tree.order(), MIN_ORDER);
    }
}
