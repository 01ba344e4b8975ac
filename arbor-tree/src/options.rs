//! Options of tree readers and writers.

use std::num::NonZeroUsize;
use std::ops::Range;

use arbor_compress::Compression;
use arbor_error::{ArborResult, arbor_bail};

use crate::metrics::ArborMetrics;

/// Default target size of a basket payload, in bytes.
pub const DEFAULT_BASKET_SIZE: i32 = 32000;
/// Default capacity of the span tables of a new branch.
pub const DEFAULT_MAX_BASKETS: i32 = 10;
/// Default capacity of the offset table of variable-length baskets.
pub const DEFAULT_ENTRY_OFFSET_LEN: i32 = 1000;

/// Number of baskets decoded ahead of the reader, per branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Concurrency {
    /// One more than the available parallelism.
    #[default]
    Auto,
    /// A fixed number of baskets.
    Fixed(NonZeroUsize),
}

impl Concurrency {
    /// Negative values select [`Concurrency::Auto`], zero reads one basket at a time.
    pub fn from_i64(n: i64) -> Self {
        match usize::try_from(n) {
            Err(_) => Concurrency::Auto,
            Ok(n) => Concurrency::Fixed(NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// The number of in-flight baskets for a range of `baskets` baskets, at least one.
    pub fn resolve(self, baskets: usize) -> usize {
        let n = match self {
            Concurrency::Auto => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
                + 1,
            Concurrency::Fixed(n) => n.get(),
        };
        n.min(baskets).max(1)
    }
}

/// Options of a [`TreeReader`](crate::TreeReader).
#[derive(Clone, Default)]
pub struct ReadOptions {
    pub(crate) concurrency: Concurrency,
    pub(crate) range: Option<Range<u64>>,
    pub(crate) metrics: ArborMetrics,
}

impl ReadOptions {
    /// Configure the number of baskets decoded ahead of the reader.
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Only iterate over the entries of `range`.
    pub fn with_range(mut self, range: Range<u64>) -> Self {
        self.range = Some(range);
        self
    }

    /// Record metrics in `metrics`.
    pub fn with_metrics(mut self, metrics: ArborMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The metric registry.
    pub fn metrics(&self) -> &ArborMetrics {
        &self.metrics
    }

    /// The entries to iterate over in a tree of `entries` entries.
    pub(crate) fn entry_range(&self, entries: u64) -> ArborResult<Range<u64>> {
        let Some(range) = self.range.clone() else {
            return Ok(0..entries);
        };
        if range.start > range.end {
            arbor_bail!(
                Range: "invalid entry range {}..{}: start after end",
                range.start,
                range.end
            );
        }
        if range.end > entries {
            arbor_bail!(
                Range: "invalid entry range {}..{}: the tree holds {} entries",
                range.start,
                range.end,
                entries
            );
        }
        Ok(range)
    }
}

/// Options of a [`TreeWriter`](crate::TreeWriter).
#[derive(Clone)]
pub struct WriteOptions {
    pub(crate) title: String,
    pub(crate) basket_size: i32,
    pub(crate) compression: Compression,
    pub(crate) max_baskets: i32,
    pub(crate) entry_offset_len: i32,
    pub(crate) big_file: bool,
    pub(crate) metrics: ArborMetrics,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            title: String::new(),
            basket_size: DEFAULT_BASKET_SIZE,
            compression: Compression::default(),
            max_baskets: DEFAULT_MAX_BASKETS,
            entry_offset_len: DEFAULT_ENTRY_OFFSET_LEN,
            big_file: false,
            metrics: ArborMetrics::default(),
        }
    }
}

impl WriteOptions {
    /// Configure the title of the tree.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Configure the payload size at which baskets are flushed.
    pub fn with_basket_size(mut self, basket_size: i32) -> Self {
        self.basket_size = basket_size.max(1);
        self
    }

    /// Configure the compression of the baskets.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Configure the initial capacity of the span tables.
    pub fn with_max_baskets(mut self, max_baskets: i32) -> Self {
        self.max_baskets = max_baskets;
        self
    }

    /// Configure the capacity of the offset table of variable-length baskets.
    pub fn with_entry_offset_len(mut self, entry_offset_len: i32) -> Self {
        self.entry_offset_len = entry_offset_len.max(1);
        self
    }

    /// Use 64-bit seek pointers, needed beyond 2 GiB.
    pub fn with_big_file(mut self, big_file: bool) -> Self {
        self.big_file = big_file;
        self
    }

    /// Record metrics in `metrics`.
    pub fn with_metrics(mut self, metrics: ArborMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(-1, None)]
    #[case(0, Some(1))]
    #[case(10, Some(10))]
    fn concurrency_from_integers(#[case] n: i64, #[case] fixed: Option<usize>) {
        let expected = fixed
            .map(|n| Concurrency::Fixed(NonZeroUsize::new(n).unwrap()))
            .unwrap_or(Concurrency::Auto);
        assert_eq!(Concurrency::from_i64(n), expected);
    }

    #[test]
    fn concurrency_is_clamped_to_the_baskets() {
        assert_eq!(Concurrency::from_i64(10).resolve(1), 1);
        assert_eq!(Concurrency::from_i64(10).resolve(0), 1);
        assert_eq!(Concurrency::from_i64(3).resolve(8), 3);
        assert!(Concurrency::Auto.resolve(100) >= 2);
    }

    #[rstest]
    #[case(None, Ok(0..10))]
    #[case(Some(2..5), Ok(2..5))]
    #[case(Some(Range { start: 5, end: 2 }), Err(()))]
    #[case(Some(0..11), Err(()))]
    fn entry_ranges(#[case] range: Option<Range<u64>>, #[case] expected: Result<Range<u64>, ()>) {
        let opts = ReadOptions {
            range,
            ..ReadOptions::default()
        };
        let got = opts.entry_range(10);
        match expected {
            Ok(want) => assert_eq!(got.unwrap(), want),
            Err(()) => assert!(matches!(
                got.unwrap_err().root(),
                arbor_error::ArborError::Range(..)
            )),
        }
    }
}
