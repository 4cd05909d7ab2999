//! Generation Tree
//!
//! The domain model the dispatcher serves: a tree of text generations.
//! Each node holds the text of one continuation; requesting a new
//! continuation spawns a child node that starts out `Pending` and fills
//! in token-by-token as the streaming operation emits. The UI collaborator
//! owns layout and drawing; this module owns structure and state only.
//!
//! Callers typically pre-allocate the child's [`GenerationId`] and reuse
//! its UUID as the conversation id, so streamed events correlate straight
//! back to the node.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a generation node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationId(pub Uuid);

impl GenerationId {
    /// Create a new unique generation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle state of a generation node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationState {
    /// Created, stream not finished yet; text is partial.
    #[default]
    Pending,
    /// Stream finished; text is complete.
    Generated,
    /// User is editing the text.
    Editing,
}

/// One node in the generation tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Generation {
    /// Unique node identifier.
    pub id: GenerationId,
    /// Lifecycle state.
    pub state: GenerationState,
    /// The node's text (partial while `Pending`).
    pub text: String,
    /// Parent node, `None` for the root.
    pub parent: Option<GenerationId>,
    /// Child nodes in creation order.
    pub children: Vec<GenerationId>,
}

impl Generation {
    /// Create a generated (complete) node.
    #[must_use]
    pub fn new(id: GenerationId, text: impl Into<String>, parent: Option<GenerationId>) -> Self {
        Self {
            id,
            state: GenerationState::Generated,
            text: text.into(),
            parent,
            children: Vec::new(),
        }
    }

    /// Create a pending (streaming-in) node with empty text.
    #[must_use]
    pub fn pending(id: GenerationId, parent: GenerationId) -> Self {
        Self {
            id,
            state: GenerationState::Pending,
            text: String::new(),
            parent: Some(parent),
            children: Vec::new(),
        }
    }
}

/// Error for tree operations referencing nodes that do not exist.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The referenced parent is not in the tree.
    #[error("unknown parent generation {0}")]
    UnknownParent(GenerationId),
    /// The referenced node is not in the tree.
    #[error("unknown generation {0}")]
    UnknownGeneration(GenerationId),
}

/// Tree of generations keyed by id, with a fixed root.
///
/// Owned by the foreground thread; background operations never touch it
/// directly, they emit events that foreground handlers apply here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationTree {
    nodes: HashMap<GenerationId, Generation>,
    root: GenerationId,
}

impl GenerationTree {
    /// Create a tree with a generated root node holding `root_text`.
    #[must_use]
    pub fn new(root_text: impl Into<String>) -> Self {
        let root = Generation::new(GenerationId::new(), root_text, None);
        let root_id = root.id;
        Self {
            nodes: HashMap::from([(root_id, root)]),
            root: root_id,
        }
    }

    /// The root node's id.
    #[must_use]
    pub fn root_id(&self) -> GenerationId {
        self.root
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> &Generation {
        // The root is inserted at construction and never removed.
        self.nodes.get(&self.root).unwrap_or_else(|| unreachable!())
    }

    /// Get a node by id.
    #[must_use]
    pub fn get(&self, id: GenerationId) -> Option<&Generation> {
        self.nodes.get(&id)
    }

    /// Whether a node exists.
    #[must_use]
    pub fn contains(&self, id: GenerationId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds only the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Add a generated child with the given text. Returns the new id.
    pub fn add_child(
        &mut self,
        parent: GenerationId,
        text: impl Into<String>,
    ) -> Result<GenerationId, TreeError> {
        if !self.nodes.contains_key(&parent) {
            return Err(TreeError::UnknownParent(parent));
        }
        let child = Generation::new(GenerationId::new(), text, Some(parent));
        let child_id = child.id;
        self.nodes.insert(child_id, child);
        self.link(parent, child_id);
        Ok(child_id)
    }

    /// Add a pending child under `parent` with a pre-allocated id, to be
    /// filled in by a streaming operation.
    pub fn add_pending_child(
        &mut self,
        parent: GenerationId,
        child_id: GenerationId,
    ) -> Result<(), TreeError> {
        if !self.nodes.contains_key(&parent) {
            return Err(TreeError::UnknownParent(parent));
        }
        self.nodes.insert(child_id, Generation::pending(child_id, parent));
        self.link(parent, child_id);
        Ok(())
    }

    fn link(&mut self, parent: GenerationId, child: GenerationId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(child);
        }
    }

    /// Append streamed text to a node.
    pub fn append_text(&mut self, id: GenerationId, text: &str) -> Result<(), TreeError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(TreeError::UnknownGeneration(id))?;
        node.text.push_str(text);
        Ok(())
    }

    /// Replace a node's text (e.g. after an edit).
    pub fn set_text(&mut self, id: GenerationId, text: impl Into<String>) -> Result<(), TreeError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(TreeError::UnknownGeneration(id))?;
        node.text = text.into();
        Ok(())
    }

    /// Transition a node's lifecycle state.
    pub fn set_state(
        &mut self,
        id: GenerationId,
        state: GenerationState,
    ) -> Result<(), TreeError> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(TreeError::UnknownGeneration(id))?;
        node.state = state;
        Ok(())
    }

    /// Children of a node, in creation order.
    #[must_use]
    pub fn children_of(&self, id: GenerationId) -> &[GenerationId] {
        self.nodes
            .get(&id)
            .map_or(&[], |node| node.children.as_slice())
    }
}
