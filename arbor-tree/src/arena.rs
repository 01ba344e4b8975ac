//! Owned storage for the branches and leaves of a tree.
//!
//! Branches refer to their children, parents and leaves, and leaves to their counting leaf,
//! through indices into the arena of the tree that owns them.

use std::fmt::{Display, Formatter};

use arbor_buffer::{ObjectId, RBuffer};
use arbor_error::{ArborResult, arbor_err};

use crate::basket::Basket;
use crate::branch::Branch;
use crate::leaf::Leaf;
use crate::wire::Class;

const KIND_SHIFT: u32 = 48;
const INDEX_MASK: u64 = (1 << KIND_SHIFT) - 1;
const BRANCH_KIND: u64 = 1;
const LEAF_KIND: u64 = 2;
const BASKET_KIND: u64 = 3;

fn object_id(kind: u64, index: usize) -> ObjectId {
    ObjectId((kind << KIND_SHIFT) | (index as u64 & INDEX_MASK))
}

fn split(id: ObjectId) -> (u64, usize) {
    (
        id.0 >> KIND_SHIFT,
        usize::try_from(id.0 & INDEX_MASK).unwrap_or(usize::MAX),
    )
}

/// Index of a branch in the arena of its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub(crate) usize);

impl BranchId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0
    }

    pub(crate) fn object(self) -> ObjectId {
        object_id(BRANCH_KIND, self.0)
    }
}

impl Display for BranchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "branch#{}", self.0)
    }
}

/// Index of a leaf in the arena of its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId(pub(crate) usize);

impl LeafId {
    /// Position in the arena.
    pub fn index(self) -> usize {
        self.0
    }

    pub(crate) fn object(self) -> ObjectId {
        object_id(LEAF_KIND, self.0)
    }
}

impl Display for LeafId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "leaf#{}", self.0)
    }
}

/// Identity of the resident basket `slot` of `branch` while encoding branch metadata.
pub(crate) fn basket_object(branch: BranchId, slot: usize) -> ObjectId {
    object_id(BASKET_KIND, (branch.0 << 20) | slot)
}

/// Branches and leaves of one tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arena {
    branches: Vec<Branch>,
    leaves: Vec<Leaf>,
    baskets: Vec<Option<Basket>>,
}

impl Arena {
    /// All branches, nested ones included.
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// All leaves.
    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    /// The branch at `id`.
    pub fn branch(&self, id: BranchId) -> ArborResult<&Branch> {
        self.branches
            .get(id.0)
            .ok_or_else(|| arbor_err!(OutOfBounds: id.0, 0, self.branches.len()))
    }

    pub(crate) fn branch_mut(&mut self, id: BranchId) -> ArborResult<&mut Branch> {
        let len = self.branches.len();
        self.branches
            .get_mut(id.0)
            .ok_or_else(|| arbor_err!(OutOfBounds: id.0, 0, len))
    }

    /// The leaf at `id`.
    pub fn leaf(&self, id: LeafId) -> ArborResult<&Leaf> {
        self.leaves
            .get(id.0)
            .ok_or_else(|| arbor_err!(OutOfBounds: id.0, 0, self.leaves.len()))
    }

    pub(crate) fn leaf_mut(&mut self, id: LeafId) -> ArborResult<&mut Leaf> {
        let len = self.leaves.len();
        self.leaves
            .get_mut(id.0)
            .ok_or_else(|| arbor_err!(OutOfBounds: id.0, 0, len))
    }

    /// Add a branch, adopting its children and leaves.
    pub(crate) fn push_branch(&mut self, branch: Branch) -> ArborResult<BranchId> {
        let id = BranchId(self.branches.len());
        for &child in branch.branches() {
            self.branch_mut(child)?.parent = Some(id);
        }
        for &leaf in branch.leaves() {
            self.leaf_mut(leaf)?.branch = Some(id);
        }
        self.branches.push(branch);
        Ok(id)
    }

    /// Add a leaf.
    pub(crate) fn push_leaf(&mut self, leaf: Leaf) -> LeafId {
        self.leaves.push(leaf);
        LeafId(self.leaves.len() - 1)
    }

    /// Decode an object of `class` met inside tree metadata, returning its identity, or
    /// `None` when the class is not part of the tree model and the object must be skipped.
    pub(crate) fn decode_object(
        &mut self,
        class: &str,
        r: &mut RBuffer<'_>,
    ) -> ArborResult<Option<ObjectId>> {
        let Some(known) = Class::lookup(class) else {
            log::debug!("skipping object of class {} at {}", class, r.pos());
            return Ok(None);
        };
        let id = match known {
            Class::Branch => {
                let branch = Branch::unmarshal(r, self)?;
                self.push_branch(branch)?.object()
            }
            Class::BranchElement => {
                let branch = Branch::unmarshal_element(r, self)?;
                self.push_branch(branch)?.object()
            }
            Class::Leaf(class) => {
                let leaf = Leaf::unmarshal(class, r, self)?;
                self.push_leaf(leaf).object()
            }
            Class::Basket => {
                self.baskets.push(Some(Basket::unmarshal(r)?));
                object_id(BASKET_KIND, self.baskets.len() - 1)
            }
        };
        Ok(Some(id))
    }

    /// Resolve a decoded object to a branch.
    pub(crate) fn branch_id(&self, obj: ObjectId) -> ArborResult<BranchId> {
        match split(obj) {
            (BRANCH_KIND, index) if index < self.branches.len() => Ok(BranchId(index)),
            (kind, index) => Err(arbor_err!(
                InvalidSerde: "object {} of kind {} is not a branch",
                index,
                kind
            )),
        }
    }

    /// Resolve a decoded object to a leaf.
    pub(crate) fn leaf_id(&self, obj: ObjectId) -> ArborResult<LeafId> {
        match split(obj) {
            (LEAF_KIND, index) if index < self.leaves.len() => Ok(LeafId(index)),
            (kind, index) => Err(arbor_err!(
                InvalidSerde: "object {} of kind {} is not a leaf",
                index,
                kind
            )),
        }
    }

    /// Move a decoded basket out of the arena, to its owning branch.
    pub(crate) fn take_basket(&mut self, obj: ObjectId) -> ArborResult<Basket> {
        match split(obj) {
            (BASKET_KIND, index) => self
                .baskets
                .get_mut(index)
                .and_then(Option::take)
                .ok_or_else(|| arbor_err!(InvalidSerde: "basket {} is shared or unknown", index)),
            (kind, index) => Err(arbor_err!(
                InvalidSerde: "object {} of kind {} is not a basket",
                index,
                kind
            )),
        }
    }

    /// Find a branch by its full name, or by a dotted `parent.child` path, below `roots`.
    pub(crate) fn find_branch(&self, roots: &[BranchId], name: &str) -> Option<BranchId> {
        let mut stack = roots.iter().rev().copied().collect::<Vec<_>>();
        while let Some(id) = stack.pop() {
            let branch = self.branches.get(id.0)?;
            if branch.name() == name {
                return Some(id);
            }
            stack.extend(branch.branches().iter().rev());
        }

        let (parent, child) = name.rsplit_once('.')?;
        let parent = self.find_branch(roots, parent)?;
        self.branches
            .get(parent.0)?
            .branches()
            .iter()
            .copied()
            .find(|c| self.branches.get(c.0).is_some_and(|b| b.name() == child))
    }

    /// Find a leaf by name, or by the name of the branch holding it.
    pub(crate) fn find_leaf(&self, roots: &[BranchId], name: &str) -> Option<LeafId> {
        if let Some(id) = self
            .leaves
            .iter()
            .position(|leaf| leaf.name() == name && leaf.branch.is_some())
        {
            return Some(LeafId(id));
        }
        let branch = self.find_branch(roots, name)?;
        self.branches.get(branch.0)?.leaves().first().copied()
    }
}
