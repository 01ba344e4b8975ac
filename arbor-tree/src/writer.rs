//! Row-wise construction of a tree: values are buffered per branch in baskets that are flushed
//! to a record sink once they reach the basket size.

use std::marker::PhantomData;

use arbor_buffer::{RBuffer, WBuffer};
use arbor_error::{ArborResult, ErrorContext, arbor_bail, arbor_err};
use arbor_io::RecordSink;

use crate::arena::{BranchId, LeafId};
use crate::basket::BasketBuilder;
use crate::branch::Branch;
use crate::key::Key;
use crate::leaf::{Column, Element, ElementKind, Leaf};
use crate::metrics::{BASKET_PAYLOAD, BASKETS_FLUSHED, BYTES_WRITTEN};
use crate::options::WriteOptions;
use crate::tree::Tree;

/// Identity of a declared branch, used to designate counting branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(usize);

/// A typed handle on the values of a declared branch.
#[derive(Debug)]
pub struct Field<T> {
    id: FieldId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> Field<T> {
    /// Identity of the branch, for use in [`Shape::Var`].
    pub fn id(&self) -> FieldId {
        self.id
    }
}

/// Number of values a branch holds per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One value.
    Scalar,
    /// A fixed number of values.
    Array(usize),
    /// As many values as the current value of an integer scalar branch.
    Var(FieldId),
}

#[derive(Debug)]
struct Slot {
    branch: BranchId,
    leaf: LeafId,
    shape: Shape,
    column: Column,
    builder: BasketBuilder,
}

/// Writes the entries of one tree to a record sink.
#[derive(Debug)]
pub struct TreeWriter<S> {
    sink: S,
    tree: Tree,
    options: WriteOptions,
    slots: Vec<Slot>,
}

impl<S: RecordSink> TreeWriter<S> {
    /// A writer of the tree `name`, appending baskets to `sink`.
    pub fn new(name: &str, sink: S, options: WriteOptions) -> Self {
        Self {
            sink,
            tree: Tree::new(name, &options.title),
            options,
            slots: Vec::new(),
        }
    }

    /// The tree written so far.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// The record sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Declare a branch holding values of `T`.
    pub fn branch<T: Element>(&mut self, name: &str, shape: Shape) -> ArborResult<Field<T>> {
        self.branch_as(name, T::KIND, shape)
    }

    /// Declare a branch storing values of `T` as `kind`, such as `f32` values stored as
    /// [`ElementKind::Float16`] or `u32` values reinterpreted as `i32`.
    pub fn branch_as<T: Element>(
        &mut self,
        name: &str,
        kind: ElementKind,
        shape: Shape,
    ) -> ArborResult<Field<T>> {
        if self.tree.entries > 0 {
            arbor_bail!("tree {}: branch {} declared after rows were written", self.tree.name(), name);
        }
        if self.tree.find_branch(name).is_some() {
            arbor_bail!("tree {}: duplicate branch {}", self.tree.name(), name);
        }
        if !kind.accepts(T::KIND) {
            arbor_bail!(Binding: "branch {}: {} values cannot be stored as {}", name, T::KIND, kind);
        }

        let (len, count) = match shape {
            Shape::Scalar => (1, None),
            Shape::Array(n) => (n, None),
            Shape::Var(FieldId(count)) => {
                let slot = self.slots.get(count).ok_or_else(|| {
                    arbor_err!("branch {}: unknown counting branch {}", name, count)
                })?;
                let leaf = self.tree.leaf(slot.leaf)?;
                if slot.shape != Shape::Scalar || !leaf.kind().is_some_and(|k| k.is_integer()) {
                    arbor_bail!(
                        "branch {}: counting branch {} is not an integer scalar",
                        name,
                        leaf.name()
                    );
                }
                (1, Some((slot.leaf, leaf.name().to_string())))
            }
        };
        if kind == ElementKind::Str && shape != Shape::Scalar {
            arbor_bail!("branch {}: string branches hold one string per entry", name);
        }

        let leaf = Leaf::new(name, kind, len, count.as_ref().map(|(id, n)| (*id, n.as_str())))?;
        let title = format!(
            "{}/{}",
            leaf.title(),
            leaf.class().type_code(kind.is_unsigned())
        );
        let encoding = leaf.float_encoding();
        let leaf = self.tree.arena.push_leaf(leaf);

        let entry_offset_len = match (shape, kind) {
            (Shape::Var(_), _) | (_, ElementKind::Str) => self.options.entry_offset_len,
            _ => 0,
        };
        let branch = Branch::new(
            name,
            title,
            vec![leaf],
            self.options.compression,
            self.options.basket_size,
            entry_offset_len,
            self.options.max_baskets,
        );
        let branch = self.tree.arena.push_branch(branch)?;
        self.tree.branches.push(branch);
        self.tree.leaves.push(leaf);

        let capacity = usize::try_from(self.options.basket_size).unwrap_or(0);
        self.slots.push(Slot {
            branch,
            leaf,
            shape,
            column: Column::new(T::KIND, encoding),
            builder: BasketBuilder::new(
                name,
                self.tree.name(),
                self.options.big_file,
                entry_offset_len,
                capacity,
            ),
        });
        log::debug!("tree {}: declared branch {}", self.tree.name(), name);
        Ok(Field {
            id: FieldId(self.slots.len() - 1),
            _marker: PhantomData,
        })
    }

    fn column_mut<T: Element>(&mut self, field: &Field<T>) -> ArborResult<&mut Vec<T>> {
        let FieldId(id) = field.id;
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| arbor_err!(OutOfBounds: id, 0, len))?;
        T::values_mut(&mut slot.column)
            .ok_or_else(|| arbor_err!(AssertionFailed: "field {} holds another type", id))
    }

    /// Replace the values of `field` for the next row.
    pub fn set<T: Element>(&mut self, field: &Field<T>, values: &[T]) -> ArborResult<()> {
        let column = self.column_mut(field)?;
        column.clear();
        column.extend_from_slice(values);
        Ok(())
    }

    /// Set the value of a scalar `field` for the next row.
    pub fn set_value<T: Element>(&mut self, field: &Field<T>, value: T) -> ArborResult<()> {
        let column = self.column_mut(field)?;
        column.clear();
        column.push(value);
        Ok(())
    }

    /// Number of values `slot` must hold for the current row.
    fn expected_len(&self, slot: &Slot) -> ArborResult<usize> {
        match slot.shape {
            Shape::Scalar => Ok(1),
            Shape::Array(n) => Ok(n),
            Shape::Var(FieldId(count)) => {
                let value = self
                    .slots
                    .get(count)
                    .and_then(|c| c.column.first_as_count())
                    .unwrap_or(0);
                usize::try_from(value)
                    .map_err(|_| arbor_err!("negative element count {}", value))
            }
        }
    }

    /// Append the current values of every branch as a new row.
    ///
    /// A basket is flushed before the row when the row would make it exceed the basket size.
    /// Returns the number of payload bytes appended. On error no branch holds the row, and
    /// calling `write` again retries it.
    pub fn write(&mut self) -> ArborResult<usize> {
        let mut rows = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let n = self.expected_len(slot)?;
            let name = self.tree.branch(slot.branch)?.name();
            if slot.column.len() != n {
                arbor_bail!(
                    "branch {}: {} values set, {} expected",
                    name,
                    slot.column.len(),
                    n
                );
            }
            let mut row = WBuffer::new(0);
            slot.column.write(&mut row, n);
            slot.builder
                .check(row.len())
                .context(|| format!("branch {}: appending a row", name))?;
            rows.push((n, row));
        }

        for (i, (_, row)) in rows.iter().enumerate() {
            let slot = &self.slots[i];
            let basket_size = usize::try_from(self.tree.branch(slot.branch)?.basket_size)
                .map_err(|_| arbor_err!("negative basket size"))?;
            if !slot.builder.is_empty() && slot.builder.len() + row.len() > basket_size {
                self.flush_slot(i)?;
            }
        }

        let mut written = 0;
        for (i, (n, row)) in rows.into_iter().enumerate() {
            let slot = &mut self.slots[i];
            written += slot.builder.push(row.as_slice())?;
            let leaf = self.tree.arena.leaf_mut(slot.leaf)?;
            slot.column.observe(n, &mut leaf.extrema, &mut leaf.observed);
            let branch = self.tree.arena.branch_mut(slot.branch)?;
            branch.entries += 1;
            branch.entry_number += 1;
        }
        self.tree.entries += 1;
        Ok(written)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn flush_slot(&mut self, index: usize) -> ArborResult<()> {
        let slot = &mut self.slots[index];
        if slot.builder.is_empty() {
            return Ok(());
        }
        let branch = self.tree.arena.branch_mut(slot.branch)?;
        let entries = i64::from(slot.builder.entries());
        let seek = self.sink.position();
        let record = slot
            .builder
            .finish(branch.compression()?, seek, branch.basket_size)
            .context(|| format!("branch {}: encoding basket", branch.name()))?;
        let key = Key::unmarshal(&mut RBuffer::new(&record, 0))?;
        let loc = self
            .sink
            .write_record(&record)
            .context(|| format!("branch {}: writing basket at {}", branch.name(), seek))?;
        let nbytes = i32::try_from(loc.size)
            .map_err(|_| arbor_err!("basket record of {} bytes too large", loc.size))?;
        branch.push_basket(loc.seek, nbytes, entries)?;
        slot.builder.reset();

        let uncompressed = i64::from(key.objlen) + i64::from(key.keylen);
        branch.tot_bytes += uncompressed;
        branch.zip_bytes += i64::from(nbytes);
        self.tree.tot_bytes += uncompressed;
        self.tree.zip_bytes += i64::from(nbytes);

        let metrics = &self.options.metrics;
        metrics.counter(BASKETS_FLUSHED).inc();
        metrics.counter(BYTES_WRITTEN).add(i64::from(nbytes));
        metrics
            .histogram(BASKET_PAYLOAD)
            .update(i64::from(key.objlen));
        log::debug!(
            "branch {}: flushed {} entries into {} bytes at {}",
            branch.name(),
            entries,
            nbytes,
            loc.seek
        );
        Ok(())
    }

    /// Flush the pending baskets of every branch.
    pub fn flush(&mut self) -> ArborResult<()> {
        for i in 0..self.slots.len() {
            self.flush_slot(i)?;
        }
        self.sink.flush()?;
        Ok(())
    }

    /// The tree as it stands, with unflushed entries kept in resident baskets.
    ///
    /// Readers of the snapshot find flushed baskets in the sink and the others in memory.
    pub fn snapshot(&self) -> ArborResult<Tree> {
        let mut tree = self.tree.clone();
        for slot in &self.slots {
            if slot.builder.is_empty() {
                continue;
            }
            let branch = tree.arena.branch_mut(slot.branch)?;
            let resident = slot.builder.to_resident(branch.basket_size)?;
            let wb = branch.write_basket();
            if branch.baskets.len() <= wb {
                branch.baskets.resize(wb + 1, None);
            }
            branch.baskets[wb] = Some(resident);
        }
        Ok(tree)
    }

    /// Flush every pending basket, returning the tree and its encoded record.
    pub fn close(mut self) -> ArborResult<(Tree, Vec<u8>)> {
        self.flush()?;
        let record = self.tree.encode()?;
        log::debug!(
            "tree {}: closed with {} entries, {} bytes ({} compressed)",
            self.tree.name(),
            self.tree.entries,
            self.tree.tot_bytes,
            self.tree.zip_bytes
        );
        Ok((self.tree, record))
    }
}
