//! Prefix-sharing path index.
//!
//! Maps filesystem paths to optional properties without storing each full
//! path string. Every path segment is a key at its level, and a node only
//! counts as an "effective" entry when its properties are set; nodes that
//! exist only because a descendant was inserted carry no properties.

use crate::utils::errors::{EngineError, Result};
use std::collections::btree_map;
use std::collections::BTreeMap;

const SEPARATOR: char = '/';

/// One level of the tree, keyed by path segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathIndex {
    entries: BTreeMap<String, PathIndexNode>,
}

/// A single path segment's value: its own properties and the level below it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathIndexNode {
    properties: Option<String>,
    children: Option<PathIndex>,
}

impl PathIndexNode {
    pub fn properties(&self) -> Option<&str> {
        self.properties.as_deref()
    }

    pub fn children(&self) -> Option<&PathIndex> {
        self.children.as_ref()
    }

    /// True when this node was explicitly inserted rather than being a pure ancestor.
    pub fn is_effective(&self) -> bool {
        self.properties.is_some()
    }
}

/// Split `a/b/c` into (`a`, `b/c`). An absolute path yields an empty first segment.
fn split_path(path: &str) -> (&str, &str) {
    path.split_once(SEPARATOR).unwrap_or((path, ""))
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mark `path` with `properties`, creating ancestor nodes as needed.
    pub fn set(&mut self, path: &str, properties: impl Into<String>) {
        self.set_node(path, Some(properties.into()), None);
    }

    /// Set the node at `path`. `None` leaves the existing properties or
    /// children untouched, so re-inserting an ancestor never clears it.
    pub fn set_node(
        &mut self,
        path: &str,
        properties: Option<String>,
        children: Option<PathIndex>,
    ) {
        let (first, rest) = split_path(path);
        let node = self.entries.entry(first.to_string()).or_default();

        if rest.is_empty() {
            if properties.is_some() {
                node.properties = properties;
            }
            if children.is_some() {
                node.children = children;
            }
        } else {
            node.children
                .get_or_insert_with(PathIndex::default)
                .set_node(rest, properties, children);
        }
    }

    /// Node stored at `path`, including pure ancestors.
    pub fn get(&self, path: &str) -> Option<&PathIndexNode> {
        let (first, rest) = split_path(path);
        let node = self.entries.get(first)?;
        if rest.is_empty() {
            Some(node)
        } else {
            node.children.as_ref()?.get(rest)
        }
    }

    /// Properties of `path`, or `None` when absent or only an ancestor.
    pub fn properties(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(PathIndexNode::properties)
    }

    pub fn get_child(&self, path: &str) -> Option<&PathIndex> {
        self.get(path).and_then(PathIndexNode::children)
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn has_effective_file(&self, path: &str) -> bool {
        self.get(path).is_some_and(PathIndexNode::is_effective)
    }

    /// Depth-first walk over every stored node with its reconstructed path.
    pub fn iter_entries(&self) -> Entries<'_> {
        Entries::new(self, None, false)
    }

    pub fn iter_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.iter_entries().map(|(path, _)| path)
    }

    pub fn iter_effective_files(&self) -> impl Iterator<Item = String> + '_ {
        self.iter_entries()
            .filter(|(_, node)| node.is_effective())
            .map(|(path, _)| path)
    }

    /// The node at `path` followed by all its descendants, with full paths.
    pub fn iter_subtree<'a>(&'a self, path: &str) -> Option<Entries<'a>> {
        let node = self.get(path)?;
        Some(Entries::rooted(path, node, false))
    }

    /// Effective files whose ancestors are not themselves effective, so
    /// a directory and its contents are never both reported. With a
    /// `path`, only that subtree is walked.
    pub fn iter_effective_files_not_nested<'a>(
        &'a self,
        path: Option<&str>,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        let entries = match path {
            None => Entries::new(self, None, true),
            Some(path) => match self.get(path) {
                Some(node) => Entries::rooted(path, node, true),
                None => return Box::new(std::iter::empty()),
            },
        };
        Box::new(
            entries
                .filter(|(_, node)| node.is_effective())
                .map(|(path, _)| path),
        )
    }

    /// Build an index from newline-separated absolute paths, marking each with `properties`.
    pub fn parse_list(text: &str, properties: &str) -> Result<Self> {
        let mut index = Self::new();
        for line in text.lines().filter(|l| !l.is_empty()) {
            if !line.starts_with(SEPARATOR) {
                return Err(EngineError::CorruptedIndex(format!(
                    "relative path in list: {line}"
                )));
            }
            index.set(line, properties);
        }
        Ok(index)
    }
}

/// Restartable depth-first iterator over `(full_path, node)` pairs.
pub struct Entries<'a> {
    pending: Option<(String, &'a PathIndexNode)>,
    stack: Vec<(Option<String>, btree_map::Iter<'a, String, PathIndexNode>)>,
    prune_effective: bool,
}

impl<'a> Entries<'a> {
    fn new(index: &'a PathIndex, prefix: Option<String>, prune_effective: bool) -> Self {
        Self {
            pending: None,
            stack: vec![(prefix, index.entries.iter())],
            prune_effective,
        }
    }

    fn rooted(path: &str, node: &'a PathIndexNode, prune_effective: bool) -> Self {
        let raw = path.trim_end_matches(SEPARATOR).to_string();
        let mut entries = Self {
            pending: Some((display_path(raw.clone()), node)),
            stack: Vec::new(),
            prune_effective,
        };
        if !(prune_effective && node.is_effective()) {
            if let Some(children) = &node.children {
                entries.stack.push((Some(raw), children.entries.iter()));
            }
        }
        entries
    }
}

fn display_path(raw: String) -> String {
    if raw.is_empty() {
        SEPARATOR.to_string()
    } else {
        raw
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = (String, &'a PathIndexNode);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.pending.take() {
            return Some(item);
        }

        loop {
            let (prefix, iter) = self.stack.last_mut()?;
            match iter.next() {
                Some((segment, node)) => {
                    let raw = match prefix {
                        Some(prefix) => format!("{prefix}{SEPARATOR}{segment}"),
                        None => segment.clone(),
                    };
                    let descend = !(self.prune_effective && node.is_effective());
                    if descend {
                        if let Some(children) = &node.children {
                            self.stack.push((Some(raw.clone()), children.entries.iter()));
                        }
                    }
                    return Some((display_path(raw), node));
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}
