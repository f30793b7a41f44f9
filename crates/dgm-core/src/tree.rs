//! # Tree
//!
//! Ordered, fully materialized n-ary trees.
//!
//! A graph walk produces a `Tree` rooted at the walked document; resolution
//! maps every node to its document and reduction folds the whole tree into a
//! JSON value. Trees are immutable once built.

use std::collections::VecDeque;
use std::fmt::{self, Display, Write as _};

/// An ordered n-ary tree: a value plus an ordered sequence of child trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree<A> {
    value: A,
    children: Vec<Tree<A>>,
}

impl<A> Tree<A> {
    #[must_use]
    pub fn new(value: A, children: Vec<Tree<A>>) -> Self {
        Self { value, children }
    }

    /// A tree with a single node.
    #[must_use]
    pub fn leaf(value: A) -> Self {
        Self::new(value, Vec::new())
    }

    #[must_use]
    pub fn value(&self) -> &A {
        &self.value
    }

    #[must_use]
    pub fn children(&self) -> &[Tree<A>] {
        &self.children
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of nodes.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Tree::size).sum::<usize>()
    }

    /// Number of levels: 1 for a single node.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Tree::depth).max().unwrap_or(0)
    }

    /// Values in breadth-first order, root first.
    pub fn bfs(&self) -> impl Iterator<Item = &A> {
        let mut queue = VecDeque::from([self]);
        std::iter::from_fn(move || {
            let node = queue.pop_front()?;
            queue.extend(node.children.iter());
            Some(&node.value)
        })
    }

    /// Values in depth-first pre-order, root first.
    pub fn preorder(&self) -> impl Iterator<Item = &A> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(&node.value)
        })
    }

    /// Build a new tree of the same shape by applying `f` to every value.
    pub fn map<B>(&self, f: &mut impl FnMut(&A) -> B) -> Tree<B> {
        Tree {
            value: f(&self.value),
            children: self.children.iter().map(|c| c.map(f)).collect(),
        }
    }

    /// Like `map`, consuming the tree.
    pub fn map_into<B>(self, f: &mut impl FnMut(A) -> B) -> Tree<B> {
        Tree {
            value: f(self.value),
            children: self.children.into_iter().map(|c| c.map_into(f)).collect(),
        }
    }

    /// Like `map`, stopping at the first error.
    pub fn try_map<B, E>(&self, f: &mut impl FnMut(&A) -> Result<B, E>) -> Result<Tree<B>, E> {
        let value = f(&self.value)?;
        let children = self
            .children
            .iter()
            .map(|c| c.try_map(f))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Tree { value, children })
    }
}

impl<A: Display> Tree<A> {
    /// Render the tree one node per line, children indented under parents.
    #[must_use]
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.pretty_into(&mut out, 0);
        out
    }

    fn pretty_into(&self, out: &mut String, level: usize) {
        let _ = writeln!(out, "{}{}", "  ".repeat(level), self.value);
        for child in &self.children {
            child.pretty_into(out, level + 1);
        }
    }
}

impl<A: Display> Display for Tree<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

// =============================================================================
// TESTS
// =============================================================================
