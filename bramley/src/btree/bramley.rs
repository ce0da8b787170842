//! B-Tree implementation
//!
//! This is the main data structure exposed by the library.
//!

use std::borrow::Borrow;
use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::ops::ControlFlow;
use std::path::Path;

use anyhow::Result;
use strum::EnumString;
use thiserror::Error;

use super::iter::Iter;
use super::node::{Node, Occupancy, PushDown};
use crate::io::file::{TreeReader, TreeWriter};
use crate::record::Record;

/// When accessing tree contents serially, ascending or descending order.
#[derive(Clone, Copy, Debug, EnumString, PartialEq)]
#[strum(ascii_case_insensitive)]
pub enum Direction {
    /// Process in ascending order.
    Ascending,
    /// Process in descending order.
    Descending,
}

/// Entries which we wish to store in a Bramley tree.
pub trait BramleyEntry: Ord + Debug {}

// Blanket implementation which satisfies the compiler
impl<E> BramleyEntry for E
where
    E: Ord + Debug,
{
    // Nothing to implement, since E already supports the other traits.
}

/// Bramley specific errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BramleyError {
    /// Supplied order too small
    #[error("order: {0} must be >= 3")]
    OrderTooSmall(usize),

    /// Supplied order too large to be recorded in a structure file
    #[error("order: {0} must be <= 65536")]
    OrderTooLarge(usize),

    /// An equal entry is already in the tree
    #[error("duplicate key")]
    DuplicateKey,

    /// No equal entry is in the tree
    #[error("key not present")]
    KeyNotPresent,

    /// Could not allocate a node
    #[error("out of memory")]
    OutOfMemory,

    /// A serialized key doesn't fit the 16 bit key size field
    #[error("serialized key is {0} bytes, must be <= 65535")]
    KeyTooLarge(usize),

    /// The data file would outgrow its 32 bit offsets
    #[error("data file would grow to {0} bytes, must be <= 4294967295")]
    DataFileTooLarge(u64),

    /// Structure file written by an unknown format version
    #[error("file version not supported: {0}")]
    InvalidFileVersion(u8),

    /// Structure file does not describe a valid tree
    #[error("corrupt structure file: {0}")]
    Corrupt(String),

    /// A tree invariant does not hold
    #[error("invariant violated: {0}")]
    Invariant(String),
}

type RemoveHook<E> = Box<dyn FnMut(&E)>;

/// A B-Tree.
pub struct Bramley<E> {
    occupancy: Occupancy,
    root: Option<Box<Node<E>>>,
    len: usize,
    on_remove: Option<RemoveHook<E>>,
}

impl<E> Bramley<E>
where
    E: BramleyEntry,
{
    /// Create a new, empty tree with the specified order (maximum children per node).
    pub fn try_new(order: usize) -> Result<Self, BramleyError> {
        if order < 3 {
            return Err(BramleyError::OrderTooSmall(order));
        }
        if order - 1 > usize::from(u16::MAX) {
            return Err(BramleyError::OrderTooLarge(order));
        }
        let occupancy = Occupancy::from_max(order - 1);
        tracing::debug!(order, max = occupancy.max, min = occupancy.min, "creating B-Tree");
        Ok(Self {
            occupancy,
            root: None,
            len: 0,
            on_remove: None,
        })
    }

    /// Register a hook which is called once for each entry as it leaves the tree for good: by
    /// deletion, by `clear`, by being replaced in `read` or when the tree is dropped.
    pub fn with_on_remove(mut self, hook: impl FnMut(&E) + 'static) -> Self {
        self.set_on_remove(hook);
        self
    }

    /// Register (or replace) the removal hook.
    pub fn set_on_remove(&mut self, hook: impl FnMut(&E) + 'static) {
        self.on_remove = Some(Box::new(hook));
    }

    /// Add an entry. Fails if an equal entry is already present, leaving the tree unchanged.
    pub fn add(&mut self, entry: E) -> Result<(), BramleyError> {
        let occupancy = self.occupancy;
        let Some(root) = self.root.as_mut() else {
            let mut root = Node::try_new(occupancy.max, true)?;
            root.push_entry(entry);
            self.root = Some(Box::new(root));
            self.len = 1;
            return Ok(());
        };

        // Every node we could need is allocated before anything is modified
        let mut spares = root
            .reserve_splits(&entry, occupancy)
            .inspect_err(|e| tracing::debug!(?entry, "add failed: {e}"))?;

        if let PushDown::Split(median, right) = root.push_down(entry, occupancy, &mut spares)? {
            let mut new_root = spares.pop().ok_or_else(|| {
                BramleyError::Invariant("no root reserved for split".to_string())
            })?;
            if let Some(old_root) = self.root.take() {
                new_root.push_child(old_root);
            }
            new_root.push_entry(median);
            new_root.push_child(right);
            self.root = Some(new_root);
            tracing::debug!(depth = self.depth(), "B-Tree grew");
        }
        self.len += 1;
        Ok(())
    }

    /// Delete the entry equal to the target and return it.
    pub fn delete<Q>(&mut self, target: &Q) -> Result<E, BramleyError>
    where
        E: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        let occupancy = self.occupancy;
        let root = self
            .root
            .as_mut()
            .ok_or(BramleyError::KeyNotPresent)
            .inspect_err(|e| tracing::debug!(?target, "delete failed: {e}"))?;
        let removed = root
            .remove(target, occupancy)
            .inspect_err(|e| tracing::debug!(?target, "delete failed: {e}"))?;

        if root.len() == 0 {
            // Only way the tree shrinks
            let child = root.take_only_child();
            self.root = child;
            tracing::debug!(depth = self.depth(), "B-Tree shrank");
        }
        self.len -= 1;
        if let Some(hook) = self.on_remove.as_mut() {
            hook(&removed);
        }
        Ok(removed)
    }

    /// Find the entry equal to the target.
    pub fn find<Q>(&self, target: &Q) -> Option<&E>
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.root.as_ref()?.find(target)
    }

    /// Does the tree contain an entry equal to the target?
    pub fn contains<Q>(&self, target: &Q) -> bool
    where
        E: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find(target).is_some()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        if let Some(root) = self.root.take() {
            match self.on_remove.as_mut() {
                Some(hook) => teardown(root, &mut **hook),
                None => drop(root),
            }
        }
        self.len = 0;
    }

    /// Return first entry.
    pub fn first(&self) -> Option<&E> {
        self.root.as_ref()?.first()
    }

    /// Return last entry.
    pub fn last(&self) -> Option<&E> {
        self.root.as_ref()?.last()
    }

    /// Return count of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Is the tree empty?
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Return the order (maximum number of children per node).
    pub fn order(&self) -> usize {
        self.occupancy.order()
    }

    /// Return the number of levels in the tree. An empty tree has a depth of 0.
    pub fn depth(&self) -> usize {
        self.root.as_ref().map_or(0, |root| root.height())
    }

    /// Return an iterator over the entries.
    pub fn iter(&self, direction: Direction) -> Iter<'_, E> {
        Iter::new(self.root.as_deref(), direction, self.len)
    }

    /// Traverse entries until exhausted or callback returns break.
    pub fn traverse_entries(
        &self,
        direction: Direction,
        mut f: impl FnMut(&E) -> ControlFlow<()>,
    ) {
        for entry in self.iter(direction) {
            match f(entry) {
                ControlFlow::Break(_) => break,
                ControlFlow::Continue(_) => continue,
            }
        }
    }

    /// Return the entries of each node, level by level from the root, left to right.
    pub fn levels(&self) -> Vec<Vec<&[E]>> {
        let mut levels = vec![];
        let mut queue: VecDeque<_> = self.root.as_deref().into_iter().collect();
        while !queue.is_empty() {
            let mut level = Vec::with_capacity(queue.len());
            for _ in 0..queue.len() {
                if let Some(node) = queue.pop_front() {
                    level.push(node.entries());
                    queue.extend(node.children().iter().map(|c| &**c));
                }
            }
            levels.push(level);
        }
        levels
    }

    /// Return node utilization (stored entries / entry capacity).
    pub fn utilization(&self) -> f64 {
        match &self.root {
            Some(root) => {
                let capacity = root.node_count() * self.occupancy.max;
                self.len as f64 / capacity as f64
            }
            None => 0.0,
        }
    }

    /// Verify all the nodes in the tree.
    pub fn verify(&self) -> Result<(), BramleyError> {
        let count = match &self.root {
            Some(root) => {
                root.verify(self.occupancy, true, None, None)?;
                root.entry_count()
            }
            None => 0,
        };
        if count != self.len {
            return Err(BramleyError::Invariant(format!(
                "tree holds {count} entries but records {}",
                self.len
            )));
        }
        Ok(())
    }

    /// Log basic information about our B-Tree.
    pub fn info(&self) {
        tracing::info!(
            order = self.order(),
            entries = self.len,
            depth = self.depth(),
            utilization = self.utilization(),
            "B-Tree"
        );
    }

    /// Print to stdout all the nodes in the tree, one level per line.
    pub fn print_nodes(&self) {
        for (depth, level) in self.levels().iter().enumerate() {
            println!("level {depth}: {level:?}");
        }
    }
}

impl<E> Bramley<E>
where
    E: BramleyEntry + Record,
{
    /// Write the tree to a structure file and a data file. Both files are created or truncated.
    pub fn write<P, Q>(&self, structure: P, data: Q) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (structure, data) = (structure.as_ref(), data.as_ref());
        tracing::info!(
            "Writing B-Tree to: {} and {}",
            structure.display(),
            data.display()
        );
        let writer = TreeWriter::try_new(structure, data)?;
        let depth = writer.write_tree(self.occupancy, self.root.as_deref())?;
        tracing::info!(entries = self.len, depth, "B-Tree written");
        Ok(())
    }

    /// Read a tree from a structure file and a data file written by [`Bramley::write`].
    pub fn try_read<P, Q>(structure: P, data: Q) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (occupancy, root) = Self::load(structure.as_ref(), data.as_ref())?;
        let len = root.as_ref().map_or(0, |r| r.entry_count());
        Ok(Self {
            occupancy,
            root,
            len,
            on_remove: None,
        })
    }

    /// Replace the contents of this tree with a tree read from a structure file and a data file.
    /// The order of the tree becomes the order recorded in the file. On failure the tree is
    /// unchanged.
    pub fn read<P, Q>(&mut self, structure: P, data: Q) -> Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (occupancy, root) = Self::load(structure.as_ref(), data.as_ref())?;
        self.clear();
        self.len = root.as_ref().map_or(0, |r| r.entry_count());
        self.occupancy = occupancy;
        self.root = root;
        Ok(())
    }

    fn load(structure: &Path, data: &Path) -> Result<(Occupancy, Option<Box<Node<E>>>)> {
        tracing::info!(
            "Reading B-Tree from: {} and {}",
            structure.display(),
            data.display()
        );
        let mut reader = TreeReader::try_open(structure, data)?;
        let occupancy = reader.occupancy();
        let root = reader.read_tree()?;
        tracing::info!(
            order = occupancy.order(),
            depth = reader.depth(),
            "B-Tree read"
        );
        Ok((occupancy, root))
    }
}

impl<E> Bramley<E>
where
    E: BramleyEntry + Display,
{
    /// Print to stdout all the entries in the tree.
    pub fn print_entries(&self, direction: Direction) {
        let mut sep = "";
        let callback = |entry: &E| {
            print!("{sep}{entry}");
            sep = ", ";
            ControlFlow::Continue(())
        };
        self.traverse_entries(direction, callback);
        println!();
    }
}

/// Post-order teardown, calling the hook once per entry.
fn teardown<E, F>(node: Box<Node<E>>, hook: &mut F)
where
    F: FnMut(&E) + ?Sized,
{
    let (entries, children) = (*node).into_parts();
    for child in children {
        teardown(child, hook);
    }
    for entry in &entries {
        hook(entry);
    }
}

impl<E> Drop for Bramley<E> {
    fn drop(&mut self) {
        if let (Some(root), Some(hook)) = (self.root.take(), self.on_remove.as_mut()) {
            teardown(root, &mut **hook);
        }
    }
}
