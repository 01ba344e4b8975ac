//! Row iteration over the bound leaves of a tree.

use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;

use arbor_buffer::RBuffer;
use arbor_error::{ArborResult, ErrorContext, arbor_bail, arbor_err};
use arbor_io::ReadAt;

use crate::arena::{BranchId, LeafId};
use crate::codec::BasketSource;
use crate::cursor::BranchCursor;
use crate::leaf::{Column, Element};
use crate::metrics::ENTRIES_READ;
use crate::options::ReadOptions;
use crate::prefetch::Prefetcher;
use crate::span::Span;
use crate::tree::Tree;

/// A typed handle on the values of a bound leaf.
#[derive(Debug)]
pub struct Binding<T> {
    slot: usize,
    leaf: LeafId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Binding<T> {}

impl<T> Binding<T> {
    /// The bound leaf.
    pub fn leaf(&self) -> LeafId {
        self.leaf
    }
}

#[derive(Debug)]
struct LeafSlot {
    leaf: LeafId,
    column: Column,
    count: Option<(usize, i64)>,
    bound: bool,
}

#[derive(Debug)]
struct BranchSlot {
    id: BranchId,
    source: BasketSource,
    spans: Vec<Span>,
    cursor: BranchCursor,
    prefetch: Option<Prefetcher>,
    leaves: Vec<usize>,
}

/// Reads the entries of a tree, one row at a time.
///
/// Every leaf of a branch is decoded in order, so binding one leaf of a multi-leaf branch
/// decodes its siblings too. Counting leaves of variable-length leaves are bound implicitly and
/// their branches are read first.
#[derive(Debug)]
pub struct TreeReader<'t> {
    tree: &'t Tree,
    reader: Arc<dyn ReadAt>,
    options: ReadOptions,
    range: Range<u64>,
    branches: Vec<BranchSlot>,
    leaves: Vec<LeafSlot>,
    next: u64,
    started: bool,
}

impl<'t> TreeReader<'t> {
    /// A reader over the entries of `tree` stored in `reader`.
    ///
    /// The entry range of `options` is validated here, before any byte is read.
    pub fn new(reader: Arc<dyn ReadAt>, tree: &'t Tree, options: ReadOptions) -> ArborResult<Self> {
        let range = options.entry_range(tree.entries())?;
        Ok(Self {
            tree,
            reader,
            options,
            next: range.start,
            range,
            branches: Vec::new(),
            leaves: Vec::new(),
            started: false,
        })
    }

    /// The tree being read.
    pub fn tree(&self) -> &'t Tree {
        self.tree
    }

    /// The entries iterated by [`next`](Self::next).
    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    /// Bind the leaf `name`, or the first leaf of the branch `name`, to values of `T`.
    ///
    /// Fails when the leaf does not exist, when its values cannot be represented as `T`, when
    /// it is already bound, or once iteration started.
    pub fn bind<T: Element>(&mut self, name: &str) -> ArborResult<Binding<T>> {
        if self.started {
            arbor_bail!(Binding: "cannot bind {} after reading started", name);
        }
        let tree = self.tree;
        let id = tree
            .find_leaf(name)
            .ok_or_else(|| arbor_err!(Binding: "tree {} has no leaf {}", tree.name(), name))?;
        let leaf = tree.leaf(id)?;
        let kind = leaf.kind().ok_or_else(|| {
            arbor_err!(Binding: "leaf {} holds streamed members and cannot be bound", name)
        })?;
        if !kind.accepts(T::KIND) {
            arbor_bail!(
                Binding: "leaf {} holds {} values, which cannot be read as {}",
                name,
                kind,
                T::KIND
            );
        }

        let slot = self.leaf_slot(id)?;
        let bound = &mut self.leaves[slot];
        if bound.bound {
            arbor_bail!(Binding: "leaf {} is already bound", name);
        }
        bound.column = Column::new(T::KIND, leaf.float_encoding());
        bound.bound = true;
        log::debug!("bound leaf {} of tree {} as {}", name, tree.name(), T::KIND);
        Ok(Binding {
            slot,
            leaf: id,
            _marker: PhantomData,
        })
    }

    /// The slot of the leaf `id`, adding its branch, and the branches of counting leaves, on
    /// first use.
    fn leaf_slot(&mut self, id: LeafId) -> ArborResult<usize> {
        if let Some(slot) = self.leaves.iter().position(|s| s.leaf == id) {
            return Ok(slot);
        }
        let branch = self
            .tree
            .leaf(id)?
            .branch()
            .ok_or_else(|| arbor_err!(Binding: "leaf {} belongs to no branch", id))?;
        self.add_branch(branch)?;
        self.leaves
            .iter()
            .position(|s| s.leaf == id)
            .ok_or_else(|| arbor_err!(AssertionFailed: "leaf {} missing from its branch", id))
    }

    fn add_branch(&mut self, id: BranchId) -> ArborResult<()> {
        let tree = self.tree;
        let branch = tree.branch(id)?;
        let spans = branch.spans()?;
        let source = BasketSource::new(self.reader.clone(), branch, self.options.metrics.clone());
        let cursor = BranchCursor::new(source.clone(), spans.clone());

        let mut slots = Vec::with_capacity(branch.leaves().len());
        for &leaf_id in branch.leaves() {
            let leaf = tree.leaf(leaf_id)?;
            let kind = leaf.kind().ok_or_else(|| {
                arbor_err!(
                    Binding: "branch {}: leaf {} holds streamed members and cannot be read",
                    branch.name(),
                    leaf.name()
                )
            })?;
            slots.push(self.leaves.len());
            self.leaves.push(LeafSlot {
                leaf: leaf_id,
                column: Column::new(kind, leaf.float_encoding()),
                count: None,
                bound: false,
            });
        }
        self.branches.push(BranchSlot {
            id,
            source,
            spans,
            cursor,
            prefetch: None,
            leaves: slots.clone(),
        });

        for slot in slots {
            let Some(count) = tree.leaf(self.leaves[slot].leaf)?.count() else {
                continue;
            };
            let count_leaf = tree.leaf(count)?;
            if !count_leaf.kind().is_some_and(|k| k.is_integer()) {
                arbor_bail!(
                    InvalidSerde: "leaf {} is counted by the non-integer leaf {}",
                    tree.leaf(self.leaves[slot].leaf)?.name(),
                    count_leaf.name()
                );
            }
            let count_slot = self.leaf_slot(count)?;
            self.leaves[slot].count = Some((count_slot, count_leaf.imax()));
        }
        Ok(())
    }

    /// Order the branches so that counting leaves are read before the leaves they count.
    fn start(&mut self) {
        let counting = self
            .leaves
            .iter()
            .filter_map(|s| s.count.map(|(slot, _)| self.leaves[slot].leaf))
            .collect::<Vec<_>>();
        let holds_counts = |b: &BranchSlot| {
            b.leaves
                .iter()
                .any(|&slot| counting.contains(&self.leaves[slot].leaf))
        };
        let (mut first, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.branches).into_iter().partition(holds_counts);
        first.extend(rest);
        self.branches = first;
        self.started = true;
    }

    /// Decode the next entry of the range into the bound leaves.
    ///
    /// Returns the entry number, or `None` at the end of the range.
    pub fn next(&mut self) -> ArborResult<Option<u64>> {
        if !self.started {
            self.start();
        }
        if self.next >= self.range.end {
            self.close();
            return Ok(None);
        }
        let entry = self.next;

        for branch in &mut self.branches {
            if branch.prefetch.is_none() {
                branch.prefetch = Some(Prefetcher::spawn(
                    branch.source.clone(),
                    &branch.spans,
                    self.range.clone(),
                    self.options.concurrency,
                )?);
            }
            let Some(prefetch) = branch.prefetch.as_mut() else {
                continue;
            };
            while !prefetch.current().is_some_and(|b| b.span.contains(entry)) {
                let Some(ready) = prefetch.read()? else {
                    arbor_bail!(
                        MissingBasket: "branch {}: no basket for entry {}",
                        branch.source.branch(),
                        entry
                    );
                };
                if ready.span.beg > entry {
                    arbor_bail!(
                        MissingBasket: "branch {}: no basket for entry {}",
                        branch.source.branch(),
                        entry
                    );
                }
            }
            let ready = prefetch.current().ok_or_else(|| {
                arbor_err!(AssertionFailed: "branch {}: basket vanished", branch.source.branch())
            })?;
            let mut r = ready.basket.entry_reader(entry - ready.span.beg, 0)?;
            decode_leaves(self.tree, &mut r, &branch.leaves, &mut self.leaves)
                .context(|| format!("branch {}: decoding entry {}", branch.source.branch(), entry))?;
        }

        self.next += 1;
        self.options.metrics.counter(ENTRIES_READ).inc();
        Ok(Some(entry))
    }

    /// Decode the entry `entry` into the bound leaves, loading its baskets synchronously.
    ///
    /// Returns `false` when `entry` is the end of the data, and fails when no basket holds it.
    /// Sequential iteration with [`next`](Self::next) is unaffected.
    pub fn read_entry(&mut self, entry: u64) -> ArborResult<bool> {
        if !self.started {
            self.start();
        }
        for branch in &mut self.branches {
            if !branch.cursor.load_entry(entry)? {
                return Ok(false);
            }
            let mut r = branch.cursor.entry_reader(entry, 0)?;
            decode_leaves(self.tree, &mut r, &branch.leaves, &mut self.leaves)
                .context(|| format!("branch {}: decoding entry {}", branch.source.branch(), entry))?;
        }
        self.options.metrics.counter(ENTRIES_READ).inc();
        Ok(true)
    }

    /// The values of the current entry.
    pub fn values<T: Element>(&self, binding: &Binding<T>) -> &[T] {
        self.leaves
            .get(binding.slot)
            .and_then(|slot| T::values(&slot.column))
            .unwrap_or(&[])
    }

    /// The first value of the current entry, or the default value when there is none.
    pub fn value<T: Element>(&self, binding: &Binding<T>) -> T {
        self.values(binding).first().cloned().unwrap_or_default()
    }

    /// Stop the read-ahead of every branch.
    pub fn close(&mut self) {
        for branch in &mut self.branches {
            if let Some(mut prefetch) = branch.prefetch.take() {
                prefetch.close();
            }
        }
    }

    /// Branches being read, in reading order.
    pub fn branches(&self) -> Vec<BranchId> {
        self.branches.iter().map(|b| b.id).collect()
    }
}

fn decode_leaves(
    tree: &Tree,
    r: &mut RBuffer<'_>,
    slots: &[usize],
    leaves: &mut [LeafSlot],
) -> ArborResult<()> {
    for &slot in slots {
        let count = match leaves[slot].count {
            Some((count_slot, imax)) => Some((
                leaves[count_slot].column.first_as_count().unwrap_or(0),
                imax,
            )),
            None => None,
        };
        let leaf = tree.leaf(leaves[slot].leaf)?;
        let n = leaf.entry_len(count);
        leaves[slot]
            .column
            .read(r, n)
            .context(|| format!("leaf {}: reading {} values", leaf.name(), n))?;
    }
    Ok(())
}
