use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Thought;
use crate::error::{SearchError, SearchResult};

/// Insertion-ordered arena of the thoughts owned by one tree.
///
/// Thoughts are addressed by id through an index rebuilt on deserialization.
/// There is no removal: thoughts live exactly as long as their tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Thought>", into = "Vec<Thought>")]
pub struct ThoughtStore {
    thoughts: Vec<Thought>,
    index: HashMap<String, usize>,
}

impl ThoughtStore {
    /// Create a store holding only `root`.
    pub fn with_root(root: Thought) -> Self {
        Self::from(vec![root])
    }

    /// Attach a new pending thought under `parent_id`.
    ///
    /// The child gets `depth = parent.depth + 1` and is appended to the
    /// parent's `children`.
    pub fn insert_child(
        &mut self,
        parent_id: &str,
        content: impl Into<String>,
        rationale: impl Into<String>,
    ) -> SearchResult<&Thought> {
        let parent_idx = self.position(parent_id)?;

        let mut child = Thought::new(content, rationale);
        child.parent_id = Some(parent_id.to_string());
        child.depth = self.thoughts[parent_idx].depth + 1;

        let child_idx = self.thoughts.len();
        self.thoughts[parent_idx].children.push(child.id.clone());
        self.index.insert(child.id.clone(), child_idx);
        self.thoughts.push(child);

        Ok(&self.thoughts[child_idx])
    }

    /// Look up a thought by id.
    pub fn get(&self, id: &str) -> SearchResult<&Thought> {
        self.position(id).map(|idx| &self.thoughts[idx])
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> SearchResult<&mut Thought> {
        let idx = self.position(id)?;
        Ok(&mut self.thoughts[idx])
    }

    /// Whether a thought with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Number of thoughts, root included.
    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    /// Whether the store holds no thoughts.
    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }

    /// All thoughts in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Thought> {
        self.thoughts.iter()
    }

    /// Children of `id` in generation order.
    pub fn children_of(&self, id: &str) -> SearchResult<Vec<&Thought>> {
        let parent = self.get(id)?;
        parent.children.iter().map(|c| self.get(c)).collect()
    }

    /// Thoughts without children, in creation order.
    pub fn leaves(&self) -> impl Iterator<Item = &Thought> {
        self.thoughts.iter().filter(|t| t.is_leaf())
    }

    /// The thoughts from the root down to `id`, inclusive.
    pub fn path_to_root(&self, id: &str) -> SearchResult<Vec<&Thought>> {
        let mut path = Vec::new();
        let mut current = Some(self.get(id)?);

        while let Some(thought) = current {
            // A well-formed tree never revisits a thought; bail out on corrupt links.
            if path.len() > self.thoughts.len() {
                return Err(SearchError::invalid(
                    "thoughts",
                    format!("parent links from {} form a cycle", id),
                ));
            }
            path.push(thought);
            current = match &thought.parent_id {
                Some(parent_id) => Some(self.get(parent_id)?),
                None => None,
            };
        }

        path.reverse();
        Ok(path)
    }

    fn position(&self, id: &str) -> SearchResult<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| SearchError::ThoughtNotFound {
                thought_id: id.to_string(),
            })
    }
}

impl From<Vec<Thought>> for ThoughtStore {
    fn from(thoughts: Vec<Thought>) -> Self {
        let index = thoughts
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.id.clone(), idx))
            .collect();
        Self { thoughts, index }
    }
}

impl From<ThoughtStore> for Vec<Thought> {
    fn from(store: ThoughtStore) -> Self {
        store.thoughts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_root() -> (ThoughtStore, String) {
        let root = Thought::new("root", "start");
        let root_id = root.id.clone();
        (ThoughtStore::with_root(root), root_id)
    }

    #[test]
    fn test_insert_child_sets_depth_and_links() {
        let (mut store, root_id) = store_with_root();

        let child_id = store.insert_child(&root_id, "a", "why a").unwrap().id.clone();
        let grandchild = store.insert_child(&child_id, "a.1", "why a.1").unwrap().clone();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&child_id).unwrap().depth, 1);
        assert_eq!(grandchild.depth, 2);
        assert_eq!(grandchild.parent_id.as_deref(), Some(child_id.as_str()));
        assert_eq!(store.get(&root_id).unwrap().children, vec![child_id.clone()]);
        assert_eq!(store.get(&child_id).unwrap().children, vec![grandchild.id]);
    }

    #[test]
    fn test_insert_child_unknown_parent() {
        let (mut store, _) = store_with_root();
        let err = store.insert_child("missing", "a", "b").unwrap_err();
        assert!(matches!(err, SearchError::ThoughtNotFound { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_unknown() {
        let (store, _) = store_with_root();
        assert!(store.get("nope").unwrap_err().is_not_found());
        assert!(!store.contains("nope"));
    }

    #[test]
    fn test_children_preserve_generation_order() {
        let (mut store, root_id) = store_with_root();
        for name in ["first", "second", "third"] {
            store.insert_child(&root_id, name, "").unwrap();
        }
        let contents: Vec<&str> = store
            .children_of(&root_id)
            .unwrap()
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_leaves_in_creation_order() {
        let (mut store, root_id) = store_with_root();
        let a = store.insert_child(&root_id, "a", "").unwrap().id.clone();
        store.insert_child(&root_id, "b", "").unwrap();
        store.insert_child(&a, "a.1", "").unwrap();

        let leaves: Vec<&str> = store.leaves().map(|t| t.content.as_str()).collect();
        assert_eq!(leaves, vec!["b", "a.1"]);
    }

    #[test]
    fn test_path_to_root() {
        let (mut store, root_id) = store_with_root();
        let a = store.insert_child(&root_id, "a", "").unwrap().id.clone();
        let b = store.insert_child(&a, "b", "").unwrap().id.clone();

        let path: Vec<&str> = store
            .path_to_root(&b)
            .unwrap()
            .iter()
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(path, vec!["root", "a", "b"]);
    }

    #[test]
    fn test_path_to_root_detects_cycle() {
        let (mut store, root_id) = store_with_root();
        let a = store.insert_child(&root_id, "a", "").unwrap().id.clone();
        store.get_mut(&root_id).unwrap().parent_id = Some(a.clone());

        assert!(store.path_to_root(&a).is_err());
    }

    #[test]
    fn test_index_rebuilt_after_deserialize() {
        let (mut store, root_id) = store_with_root();
        let a = store.insert_child(&root_id, "a", "").unwrap().id.clone();

        let json = serde_json::to_value(&store).unwrap();
        assert!(json.is_array());

        let restored: ThoughtStore = serde_json::from_value(json).unwrap();
        assert_eq!(restored.get(&a).unwrap().content, "a");
        assert_eq!(restored.len(), 2);
    }
}
