//! Containers of the threading algorithm.
//!
//! Containers live in an arena owned by the [`Forest`] and refer to
//! each other by [`ContainerId`]. A container either wraps a message
//! of the threaded batch, or is a placeholder for a message that is
//! referenced but was never seen.

use std::fmt;

/// The index of a container inside its forest.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ContainerId(pub(crate) usize);

#[derive(Clone, Debug, Default)]
pub(crate) struct Container {
    /// Index of the message inside the threaded batch, `None` for
    /// placeholders.
    pub message: Option<usize>,
    pub message_id: Option<String>,
    pub parent: Option<ContainerId>,
    pub first_child: Option<ContainerId>,
    pub next_sibling: Option<ContainerId>,
}

/// An anomaly found while threading.
///
/// Message headers come from untrusted content: anomalies never stop
/// the threading, they are collected in the forest instead.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ThreadAnomaly {
    /// The message at the given index of the batch has the same
    /// Message-ID as a previous one. It is left out of the forest.
    DuplicateIdentifier { message: usize, message_id: String },
    /// Linking the child under the parent would have made the child
    /// its own ancestor. The link has been skipped.
    CycleDetected {
        parent: Option<String>,
        child: Option<String>,
    },
}

/// The result of a threading run: ordered conversation trees.
#[derive(Clone, Debug, Default)]
pub struct Forest {
    pub(crate) containers: Vec<Container>,
    pub(crate) roots: Vec<ContainerId>,
    pub(crate) anomalies: Vec<ThreadAnomaly>,
}

impl Forest {
    /// Return the number of trees.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = ThreadNode<'_>> + '_ {
        self.roots.iter().map(|id| ThreadNode::new(self, *id))
    }

    pub fn root_at(&self, index: usize) -> Option<ThreadNode<'_>> {
        self.roots.get(index).map(|id| ThreadNode::new(self, *id))
    }

    pub fn node(&self, id: ContainerId) -> Option<ThreadNode<'_>> {
        self.containers.get(id.0).map(|_| ThreadNode::new(self, id))
    }

    pub fn anomalies(&self) -> &[ThreadAnomaly] {
        &self.anomalies
    }

    /// Return the batch indexes of messages left out of the forest
    /// because their Message-ID was already taken.
    pub fn duplicates(&self) -> impl Iterator<Item = usize> + '_ {
        self.anomalies.iter().filter_map(|anomaly| match anomaly {
            ThreadAnomaly::DuplicateIdentifier { message, .. } => Some(*message),
            _ => None,
        })
    }

    /// Walk all trees depth first, yielding every node with its
    /// depth (0 for roots).
    pub fn depth_first(&self) -> Vec<(ThreadNode<'_>, usize)> {
        let mut nodes = Vec::new();
        let mut stack: Vec<_> = self.roots.iter().rev().map(|id| (*id, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            let node = ThreadNode::new(self, id);
            let children = node.children();
            stack.extend(children.iter().rev().map(|child| (child.id, depth + 1)));
            nodes.push((node, depth));
        }

        nodes
    }

    pub(crate) fn get(&self, id: ContainerId) -> &Container {
        &self.containers[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: ContainerId) -> &mut Container {
        &mut self.containers[id.0]
    }

    pub(crate) fn push(&mut self, container: Container) -> ContainerId {
        self.containers.push(container);
        ContainerId(self.containers.len() - 1)
    }

    pub(crate) fn child_ids(&self, id: ContainerId) -> Vec<ContainerId> {
        let mut ids = Vec::new();
        let mut next = self.get(id).first_child;

        while let Some(child) = next {
            ids.push(child);
            next = self.get(child).next_sibling;
        }

        ids
    }

    /// Replace the children of the given container, in order.
    pub(crate) fn set_children(&mut self, id: ContainerId, children: &[ContainerId]) {
        self.get_mut(id).first_child = children.first().copied();

        for (i, child) in children.iter().enumerate() {
            let next = children.get(i + 1).copied();
            let container = self.get_mut(*child);
            container.parent = Some(id);
            container.next_sibling = next;
        }
    }

    /// Attach the child as the first child of the parent. The child
    /// must not have a parent.
    pub(crate) fn link(&mut self, parent: ContainerId, child: ContainerId) {
        let first_child = self.get(parent).first_child;

        let container = self.get_mut(child);
        container.parent = Some(parent);
        container.next_sibling = first_child;

        self.get_mut(parent).first_child = Some(child);
    }

    /// Detach the child from its parent, if any.
    pub(crate) fn unlink(&mut self, child: ContainerId) {
        let Some(parent) = self.get(child).parent else {
            return;
        };

        let next_sibling = self.get(child).next_sibling;

        if self.get(parent).first_child == Some(child) {
            self.get_mut(parent).first_child = next_sibling;
        } else {
            let mut prev = self.get(parent).first_child;
            while let Some(id) = prev {
                if self.get(id).next_sibling == Some(child) {
                    self.get_mut(id).next_sibling = next_sibling;
                    break;
                }
                prev = self.get(id).next_sibling;
            }
        }

        let container = self.get_mut(child);
        container.parent = None;
        container.next_sibling = None;
    }

    /// Return `true` if `ancestor` is `id` or one of its ancestors.
    ///
    /// The walk is bounded by the arena size, so it ends even on a
    /// corrupted parent chain.
    pub(crate) fn is_ancestor(&self, ancestor: ContainerId, id: ContainerId) -> bool {
        let mut current = Some(id);

        for _ in 0..=self.containers.len() {
            match current {
                Some(current_id) if current_id == ancestor => return true,
                Some(current_id) => current = self.get(current_id).parent,
                None => return false,
            }
        }

        true
    }
}

/// A read-only view on a container of a [`Forest`].
#[derive(Clone, Copy)]
pub struct ThreadNode<'a> {
    forest: &'a Forest,
    id: ContainerId,
}

impl<'a> ThreadNode<'a> {
    fn new(forest: &'a Forest, id: ContainerId) -> Self {
        Self { forest, id }
    }

    fn container(&self) -> &'a Container {
        self.forest.get(self.id)
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// Return the index of the message inside the threaded batch,
    /// `None` for placeholders.
    pub fn message(&self) -> Option<usize> {
        self.container().message
    }

    pub fn message_id(&self) -> Option<&'a str> {
        self.container().message_id.as_deref()
    }

    pub fn is_placeholder(&self) -> bool {
        self.container().message.is_none()
    }

    pub fn parent(&self) -> Option<ThreadNode<'a>> {
        self.container()
            .parent
            .map(|id| ThreadNode::new(self.forest, id))
    }

    /// Return the child at the given index, in sibling order.
    pub fn child_at(&self, index: usize) -> Option<ThreadNode<'a>> {
        self.children_iter().nth(index)
    }

    /// Return the number of direct children.
    pub fn count(&self) -> usize {
        self.children_iter().count()
    }

    /// Return the direct children, in sibling order.
    pub fn children(&self) -> Vec<ThreadNode<'a>> {
        self.children_iter().collect()
    }

    fn children_iter(&self) -> impl Iterator<Item = ThreadNode<'a>> + 'a {
        let forest = self.forest;
        let mut next = self.container().first_child;

        std::iter::from_fn(move || {
            let id = next?;
            next = forest.get(id).next_sibling;
            Some(ThreadNode::new(forest, id))
        })
    }
}

impl PartialEq for ThreadNode<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.forest, other.forest) && self.id == other.id
    }
}

impl Eq for ThreadNode<'_> {}

impl fmt::Debug for ThreadNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadNode")
            .field("id", &self.id)
            .field("message", &self.message())
            .field("message_id", &self.message_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Container, Forest};

    fn forest(size: usize) -> Forest {
        let mut forest = Forest::default();
        for _ in 0..size {
            forest.push(Container::default());
        }
        forest
    }

    #[test]
    fn link_and_unlink() {
        let mut forest = forest(4);
        let ids: Vec<_> = (0..4).map(super::ContainerId).collect();

        forest.link(ids[0], ids[1]);
        forest.link(ids[0], ids[2]);
        forest.link(ids[0], ids[3]);
        assert_eq!(forest.child_ids(ids[0]), vec![ids[3], ids[2], ids[1]]);

        forest.unlink(ids[2]);
        assert_eq!(forest.child_ids(ids[0]), vec![ids[3], ids[1]]);
        assert_eq!(forest.get(ids[2]).parent, None);

        forest.set_children(ids[0], &[ids[1], ids[3]]);
        let node = forest.node(ids[0]).unwrap();
        assert_eq!(node.count(), 2);
        assert_eq!(node.child_at(0).map(|n| n.id()), Some(ids[1]));
        assert_eq!(node.child_at(1).map(|n| n.id()), Some(ids[3]));
        assert_eq!(node.child_at(2), None);
        assert_eq!(
            node.child_at(1).and_then(|n| n.parent()).map(|n| n.id()),
            Some(ids[0])
        );
    }

    #[test]
    fn ancestors() {
        let mut forest = forest(3);
        let ids: Vec<_> = (0..3).map(super::ContainerId).collect();

        forest.link(ids[0], ids[1]);
        forest.link(ids[1], ids[2]);

        assert!(forest.is_ancestor(ids[0], ids[2]));
        assert!(forest.is_ancestor(ids[2], ids[2]));
        assert!(!forest.is_ancestor(ids[2], ids[0]));
    }
}
