use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::optimistic::EntryStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("tree_unknown_parent:{key}")]
    UnknownParent { key: String },
    #[error("tree_duplicate_node:{key}")]
    DuplicateNode { key: String },
}

/// A comment node. The node key is the temp id for locally-created nodes
/// and never changes; confirmation records the server id alongside it, so
/// the node holds its position and in-flight children still resolve their
/// parent.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode<T> {
    pub key: String,
    pub entity_id: Option<String>,
    pub payload: T,
    pub status: EntryStatus,
    pub applied_at: DateTime<Utc>,
    pub reply_count: i64,
    parent: Option<String>,
    children: Vec<String>,
}

/// Threaded-comment reconciler: optimistic nodes merged into the
/// server-anchored tree, with in-place confirmation and cascading
/// rollback.
pub struct ReconciledTree<T> {
    nodes: HashMap<String, TreeNode<T>>,
    roots: Vec<String>,
    // Server id -> node key, recorded at confirmation.
    aliases: HashMap<String, String>,
    resolved: HashSet<String>,
}

impl<T> Default for ReconciledTree<T> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            aliases: HashMap::new(),
            resolved: HashSet::new(),
        }
    }
}

impl<T> ReconciledTree<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a server-confirmed node, e.g. from a comment fetch.
    pub fn insert_confirmed(
        &mut self,
        id: &str,
        parent: Option<&str>,
        payload: T,
        reply_count: i64,
    ) -> Result<(), TreeError> {
        if self.resolve(id).is_some() {
            return Err(TreeError::DuplicateNode {
                key: id.to_string(),
            });
        }
        let parent_key = self.parent_key(parent)?;
        self.attach(TreeNode {
            key: id.to_string(),
            entity_id: Some(id.to_string()),
            payload,
            status: EntryStatus::Confirmed,
            applied_at: Utc::now(),
            reply_count,
            parent: parent_key,
            children: Vec::new(),
        });
        Ok(())
    }

    /// Inserts a pending optimistic node under `parent`, addressed by
    /// server id or temp id; replying to a still-pending parent is
    /// permitted. The parent's reply counter is incremented
    /// optimistically.
    pub fn insert_local(
        &mut self,
        temp_id: &str,
        parent: Option<&str>,
        payload: T,
    ) -> Result<(), TreeError> {
        if self.resolve(temp_id).is_some() {
            return Err(TreeError::DuplicateNode {
                key: temp_id.to_string(),
            });
        }
        let parent_key = self.parent_key(parent)?;
        self.attach(TreeNode {
            key: temp_id.to_string(),
            entity_id: None,
            payload,
            status: EntryStatus::Pending,
            applied_at: Utc::now(),
            reply_count: 0,
            parent: parent_key.clone(),
            children: Vec::new(),
        });
        if let Some(parent_key) = parent_key {
            if let Some(parent_node) = self.nodes.get_mut(&parent_key) {
                parent_node.reply_count += 1;
            }
        }
        Ok(())
    }

    /// In-place confirmation: the node keeps its key and position; the
    /// server id becomes an alias for it. Duplicate confirmations are
    /// ignored.
    pub fn confirm(&mut self, temp_id: &str, server_id: &str) -> bool {
        if self.resolved.contains(temp_id) {
            return false;
        }
        let Some(node) = self.nodes.get_mut(temp_id) else {
            return false;
        };
        if node.status.is_terminal() {
            return false;
        }
        node.status = EntryStatus::Confirmed;
        node.entity_id = Some(server_id.to_string());
        self.aliases
            .insert(server_id.to_string(), temp_id.to_string());
        true
    }

    /// Rollback with cascade: the failed node and every optimistic
    /// descendant are removed (their parent identifier will never exist),
    /// and the surviving parent's optimistic reply-count increment is
    /// undone.
    pub fn fail(&mut self, temp_id: &str) -> bool {
        if self.resolved.contains(temp_id) {
            return false;
        }
        let Some(node) = self.nodes.get(temp_id) else {
            return false;
        };
        if node.status.is_terminal() {
            return false;
        }
        let parent_key = node.parent.clone();

        let mut removed = Vec::new();
        let mut stack = vec![temp_id.to_string()];
        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.remove(&key) {
                stack.extend(node.children.iter().cloned());
                if let Some(entity_id) = &node.entity_id {
                    self.aliases.remove(entity_id);
                }
                removed.push(key);
            }
        }
        if removed.len() > 1 {
            tracing::debug!(
                temp_id,
                descendants = removed.len() - 1,
                "cascading rollback of optimistic subtree"
            );
        }
        for key in removed {
            self.resolved.insert(key);
        }

        match parent_key {
            Some(parent_key) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_key) {
                    parent_node.reply_count -= 1;
                    parent_node.children.retain(|child| child != temp_id);
                }
            }
            None => self.roots.retain(|root| root != temp_id),
        }
        true
    }

    /// Clears the removed-subtree markers that discard late resolutions.
    /// Call once no comment mutations are outstanding for this tree; the
    /// alias table is bounded by the live nodes and is kept. Returns the
    /// number of markers dropped.
    pub fn compact(&mut self) -> usize {
        let dropped = self.resolved.len();
        self.resolved.clear();
        dropped
    }

    /// Looks a node up by temp id or server id.
    #[must_use]
    pub fn node(&self, key: &str) -> Option<&TreeNode<T>> {
        self.resolve(key).and_then(|key| self.nodes.get(&key))
    }

    #[must_use]
    pub fn children(&self, key: &str) -> Vec<&TreeNode<T>> {
        self.node(key)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn roots(&self) -> Vec<&TreeNode<T>> {
        self.roots
            .iter()
            .filter_map(|root| self.nodes.get(root))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Preorder flatten for display: children in local-creation order.
    #[must_use]
    pub fn flatten(&self) -> Vec<(usize, &TreeNode<T>)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for root in &self.roots {
            self.flatten_into(root, 0, &mut out);
        }
        out
    }

    fn flatten_into<'a>(&'a self, key: &str, depth: usize, out: &mut Vec<(usize, &'a TreeNode<T>)>) {
        let Some(node) = self.nodes.get(key) else {
            return;
        };
        out.push((depth, node));
        for child in &node.children {
            self.flatten_into(child, depth + 1, out);
        }
    }

    fn resolve(&self, key: &str) -> Option<String> {
        if self.nodes.contains_key(key) {
            return Some(key.to_string());
        }
        self.aliases.get(key).cloned()
    }

    fn parent_key(&self, parent: Option<&str>) -> Result<Option<String>, TreeError> {
        match parent {
            None => Ok(None),
            Some(parent) => match self.resolve(parent) {
                Some(key) => Ok(Some(key)),
                None => Err(TreeError::UnknownParent {
                    key: parent.to_string(),
                }),
            },
        }
    }

    fn attach(&mut self, node: TreeNode<T>) {
        let key = node.key.clone();
        match node.parent.clone() {
            Some(parent_key) => {
                if let Some(parent_node) = self.nodes.get_mut(&parent_key) {
                    parent_node.children.push(key.clone());
                }
            }
            None => self.roots.push(key.clone()),
        }
        self.nodes.insert(key, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_tree() -> ReconciledTree<String> {
        let mut tree = ReconciledTree::new();
        tree.insert_confirmed("c1", None, "root comment".to_string(), 0)
            .expect("seed");
        tree
    }

    #[test]
    fn local_reply_lands_under_parent_and_bumps_counter() {
        let mut tree = seeded_tree();
        tree.insert_local("t1", Some("c1"), "reply".to_string())
            .expect("insert");

        let parent = tree.node("c1").expect("parent");
        assert_eq!(parent.reply_count, 1);
        let children = tree.children("c1");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].status, EntryStatus::Pending);
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut tree = seeded_tree();
        let outcome = tree.insert_local("t1", Some("missing"), "reply".to_string());
        assert_eq!(
            outcome,
            Err(TreeError::UnknownParent {
                key: "missing".to_string()
            })
        );
    }

    #[test]
    fn confirmation_is_in_place_and_aliases_the_server_id() {
        let mut tree = seeded_tree();
        tree.insert_local("t1", Some("c1"), "first".to_string())
            .expect("insert");
        tree.insert_local("t2", Some("c1"), "second".to_string())
            .expect("insert");

        assert!(tree.confirm("t1", "c2"));

        // Position among siblings is unchanged.
        let children = tree.children("c1");
        assert_eq!(children[0].key, "t1");
        assert_eq!(children[0].entity_id.as_deref(), Some("c2"));
        assert_eq!(children[1].key, "t2");

        // The node is reachable by its server id.
        assert_eq!(tree.node("c2").expect("node").key, "t1");
    }

    #[test]
    fn duplicate_confirmation_is_ignored() {
        let mut tree = seeded_tree();
        tree.insert_local("t1", Some("c1"), "reply".to_string())
            .expect("insert");
        assert!(tree.confirm("t1", "c2"));
        assert!(!tree.confirm("t1", "c2"));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn reply_to_pending_parent_resolves_after_confirmation() {
        let mut tree = seeded_tree();
        tree.insert_local("t1", Some("c1"), "parent".to_string())
            .expect("insert");
        tree.insert_local("t2", Some("t1"), "nested".to_string())
            .expect("insert");

        assert!(tree.confirm("t1", "c2"));
        // The nested reply is now reachable through the server id too.
        assert_eq!(tree.children("c2").len(), 1);
        assert_eq!(tree.children("c2")[0].key, "t2");
    }

    #[test]
    fn failed_parent_cascades_to_all_optimistic_replies() {
        let mut tree = seeded_tree();
        tree.insert_local("t1", Some("c1"), "parent".to_string())
            .expect("insert");
        tree.insert_local("t2", Some("t1"), "reply a".to_string())
            .expect("insert");
        tree.insert_local("t3", Some("t1"), "reply b".to_string())
            .expect("insert");
        assert_eq!(tree.len(), 4);

        assert!(tree.fail("t1"));

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node("t1"), None);
        assert_eq!(tree.node("t2"), None);
        assert_eq!(tree.node("t3"), None);
        // The surviving parent's optimistic increment is undone.
        assert_eq!(tree.node("c1").expect("root").reply_count, 0);
        assert!(tree.children("c1").is_empty());

        // Late resolutions for the removed subtree are discarded.
        assert!(!tree.confirm("t2", "c9"));
        assert!(!tree.fail("t3"));
    }

    #[test]
    fn failing_one_sibling_leaves_the_other_untouched() {
        let mut tree = seeded_tree();
        tree.insert_local("t1", Some("c1"), "a".to_string())
            .expect("insert");
        tree.insert_local("t2", Some("c1"), "b".to_string())
            .expect("insert");

        assert!(tree.fail("t1"));

        assert_eq!(tree.node("c1").expect("root").reply_count, 1);
        let children = tree.children("c1");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].key, "t2");
    }

    #[test]
    fn failed_root_is_removed_from_display() {
        let mut tree = ReconciledTree::new();
        tree.insert_local("t1", None, "root".to_string())
            .expect("insert");
        assert!(tree.fail("t1"));
        assert!(tree.is_empty());
        assert!(tree.roots().is_empty());
    }

    #[test]
    fn compact_drops_rollback_markers_and_keeps_live_nodes() {
        let mut tree = seeded_tree();
        tree.insert_local("t1", Some("c1"), "kept".to_string())
            .expect("insert");
        tree.insert_local("t2", Some("c1"), "dropped".to_string())
            .expect("insert");
        assert!(tree.confirm("t1", "c2"));
        assert!(tree.fail("t2"));

        assert_eq!(tree.compact(), 1);
        assert_eq!(tree.len(), 2);
        // Server-id lookup still works for the confirmed node.
        assert_eq!(tree.node("c2").expect("node").key, "t1");
    }

    #[test]
    fn flatten_walks_preorder_in_local_creation_order() {
        let mut tree = seeded_tree();
        tree.insert_local("t1", Some("c1"), "a".to_string())
            .expect("insert");
        tree.insert_local("t2", Some("t1"), "a.1".to_string())
            .expect("insert");
        tree.insert_local("t3", Some("c1"), "b".to_string())
            .expect("insert");

        let keys: Vec<(usize, &str)> = tree
            .flatten()
            .into_iter()
            .map(|(depth, node)| (depth, node.key.as_str()))
            .collect();
        assert_eq!(keys, [(0, "c1"), (1, "t1"), (2, "t2"), (1, "t3")]);
    }
}
