//! Synchronous resolution of entries to decoded baskets.

use std::collections::VecDeque;

use arbor_buffer::RBuffer;
use arbor_error::{ArborResult, arbor_bail};

use crate::basket::Basket;
use crate::codec::BasketSource;
use crate::span::Span;

/// Number of decoded baskets kept by a cursor by default.
pub const DEFAULT_CACHED_BASKETS: usize = 4;

/// Where an entry lives in the span table of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasketLookup {
    /// The basket at this index holds the entry.
    Found(usize),
    /// The entry is the end of the last basket: there is no more data.
    End,
    /// No basket holds the entry.
    Missing,
}

/// Loads the basket holding a requested entry, keeping a few decoded baskets around.
///
/// Lookups scan forward from the basket used last, which makes sequential access cheap.
#[derive(Debug)]
pub struct BranchCursor {
    source: BasketSource,
    spans: Vec<Span>,
    current: Option<usize>,
    cache: VecDeque<(usize, Basket)>,
    capacity: usize,
}

impl BranchCursor {
    /// A cursor over `spans`, decoding baskets with `source`.
    pub fn new(source: BasketSource, spans: Vec<Span>) -> Self {
        Self {
            source,
            spans,
            current: None,
            cache: VecDeque::with_capacity(DEFAULT_CACHED_BASKETS),
            capacity: DEFAULT_CACHED_BASKETS,
        }
    }

    /// Keep up to `capacity` decoded baskets.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// The span table.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// The span of the active basket.
    pub fn span(&self) -> Option<&Span> {
        self.current.and_then(|i| self.spans.get(i))
    }

    /// The active basket.
    pub fn basket(&self) -> Option<&Basket> {
        let i = self.current?;
        self.cache
            .iter()
            .find_map(|(k, basket)| (*k == i).then_some(basket))
    }

    /// Find the basket holding `entry`.
    pub fn find_basket_index(&self, entry: u64) -> BasketLookup {
        let Some(last) = self.spans.last() else {
            return BasketLookup::End;
        };
        if entry == 0 {
            return BasketLookup::Found(0);
        }

        let start = match self.current.and_then(|i| self.spans.get(i).map(|s| (i, s))) {
            Some((i, span)) if span.contains(entry) => return BasketLookup::Found(i),
            Some((i, span)) if entry >= span.beg => i,
            _ => 0,
        };
        if let Some(i) = self.spans[start..].iter().position(|s| s.contains(entry)) {
            return BasketLookup::Found(start + i);
        }
        if entry == last.end {
            BasketLookup::End
        } else {
            BasketLookup::Missing
        }
    }

    /// Make the basket holding `entry` active.
    ///
    /// Returns `false` when `entry` is the end of the data.
    pub fn load_entry(&mut self, entry: u64) -> ArborResult<bool> {
        if self.span().is_some_and(|s| s.contains(entry)) {
            return Ok(true);
        }
        match self.find_basket_index(entry) {
            BasketLookup::Found(i) => {
                self.activate(i)?;
                Ok(true)
            }
            BasketLookup::End => {
                self.current = None;
                Ok(false)
            }
            BasketLookup::Missing => arbor_bail!(
                MissingBasket: "branch {}: no basket for entry {}",
                self.source.branch(),
                entry
            ),
        }
    }

    fn activate(&mut self, index: usize) -> ArborResult<()> {
        if let Some(at) = self.cache.iter().position(|(k, _)| *k == index) {
            if let Some(hit) = self.cache.remove(at) {
                self.cache.push_front(hit);
            }
            self.current = Some(index);
            return Ok(());
        }

        let Some(span) = self.spans.get(index).copied() else {
            arbor_bail!(OutOfBounds: index, 0, self.spans.len());
        };
        let mut basket = if self.cache.len() >= self.capacity {
            self.cache.pop_back().map(|(_, b)| b).unwrap_or_default()
        } else {
            Basket::default()
        };
        self.current = None;
        self.source.inflate(&span, &mut basket)?;
        self.cache.push_front((index, basket));
        self.current = Some(index);
        Ok(())
    }

    /// A cursor positioned on the leaf at `leaf_offset` of `entry`, which must be loaded.
    pub fn entry_reader(&self, entry: u64, leaf_offset: i32) -> ArborResult<RBuffer<'_>> {
        match (self.span(), self.basket()) {
            (Some(span), Some(basket)) if span.contains(entry) => {
                basket.entry_reader(entry - span.beg, leaf_offset)
            }
            _ => arbor_bail!(
                AssertionFailed: "branch {}: entry {} is not loaded",
                self.source.branch(),
                entry
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arbor_compress::Compression;
    use arbor_io::{MemorySink, RecordSink};
    use rstest::rstest;

    use super::*;
    use crate::basket::BasketBuilder;
    use crate::branch::Branch;
    use crate::metrics::{ArborMetrics, BASKETS_DECODED};

    /// Three baskets holding the entries 0..2, 2..5 and 5..10 of an `i32` branch whose
    /// values are the entry numbers.
    fn fixture(metrics: &ArborMetrics) -> BranchCursor {
        let mut sink = MemorySink::with_reserved(100);
        let mut branch = Branch::new(
            "x",
            "x/I".to_string(),
            Vec::new(),
            Compression::ZLIB_DEFAULT,
            32000,
            0,
            10,
        );
        let mut builder = BasketBuilder::new("x", "t", false, 0, 64);
        for (beg, end) in [(0, 2), (2, 5), (5, 10)] {
            for v in beg..end {
                builder
                    .append(|w| {
                        w.write_i32(v);
                        Ok(())
                    })
                    .unwrap();
            }
            let record = builder
                .finish(Compression::ZLIB_DEFAULT, sink.position(), 32000)
                .unwrap();
            let loc = sink.write_record(&record).unwrap();
            builder.reset();
            branch
                .push_basket(loc.seek, i32::try_from(loc.size).unwrap(), i64::from(end - beg))
                .unwrap();
        }
        branch.entries = 10;

        let reader = Arc::new(sink.into_bytes());
        let source = BasketSource::new(reader, &branch, metrics.clone());
        BranchCursor::new(source, branch.spans().unwrap()).with_capacity(2)
    }

    fn value(cursor: &BranchCursor, entry: u64) -> i32 {
        cursor.entry_reader(entry, 0).unwrap().read_i32().unwrap()
    }

    #[rstest]
    #[case(0, BasketLookup::Found(0))]
    #[case(1, BasketLookup::Found(0))]
    #[case(4, BasketLookup::Found(1))]
    #[case(9, BasketLookup::Found(2))]
    #[case(10, BasketLookup::End)]
    #[case(11, BasketLookup::Missing)]
    fn lookups(#[case] entry: u64, #[case] expected: BasketLookup) {
        let cursor = fixture(&ArborMetrics::default());
        assert_eq!(cursor.find_basket_index(entry), expected);
    }

    #[test]
    fn sequential_and_random_access() {
        let metrics = ArborMetrics::default();
        let mut cursor = fixture(&metrics);
        for entry in 0..10 {
            assert!(cursor.load_entry(entry).unwrap());
            assert_eq!(value(&cursor, entry), i32::try_from(entry).unwrap());
        }
        assert_eq!(metrics.counter(BASKETS_DECODED).count(), 3);

        // backward jumps restart the scan
        assert!(cursor.load_entry(3).unwrap());
        assert_eq!(value(&cursor, 3), 3);
        assert!(cursor.load_entry(1).unwrap());
        assert_eq!(value(&cursor, 1), 1);
        assert_eq!(cursor.span(), Some(&Span::new(0, 2, 100, cursor.spans()[0].size)));
    }

    #[test]
    fn cached_baskets_are_not_decoded_again() {
        let metrics = ArborMetrics::default();
        let mut cursor = fixture(&metrics);
        cursor.load_entry(0).unwrap();
        cursor.load_entry(3).unwrap();
        cursor.load_entry(1).unwrap();
        assert_eq!(metrics.counter(BASKETS_DECODED).count(), 2);

        // capacity 2: decoding the third basket evicts the least recently used one
        cursor.load_entry(7).unwrap();
        cursor.load_entry(4).unwrap();
        assert_eq!(metrics.counter(BASKETS_DECODED).count(), 4);
    }

    #[test]
    fn end_of_data_and_missing_entries() {
        let mut cursor = fixture(&ArborMetrics::default());
        assert!(!cursor.load_entry(10).unwrap());
        assert!(cursor.basket().is_none());

        let err = cursor.load_entry(12).unwrap_err();
        assert!(err.is_missing_basket());
        assert!(err.to_string().contains("no basket for entry 12"));
    }

    #[test]
    fn unloaded_entries_cannot_be_read() {
        let mut cursor = fixture(&ArborMetrics::default());
        assert!(cursor.entry_reader(0, 0).is_err());
        cursor.load_entry(0).unwrap();
        assert!(cursor.entry_reader(3, 0).is_err());
    }
}
