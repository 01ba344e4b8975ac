//! Counters and timers recorded by the basket engine.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use witchcraft_metrics::{Counter, Histogram, MetricId, Timer};
use witchcraft_metrics::{Metric, MetricRegistry, Metrics, MetricsIter};

/// Number of baskets decoded, resident baskets included.
pub const BASKETS_DECODED: &str = "arbor.baskets.decoded";
/// Number of baskets flushed to a sink.
pub const BASKETS_FLUSHED: &str = "arbor.baskets.flushed";
/// Number of basket record bytes read.
pub const BYTES_READ: &str = "arbor.bytes.read";
/// Number of basket record bytes written.
pub const BYTES_WRITTEN: &str = "arbor.bytes.written";
/// Number of entries delivered to readers.
pub const ENTRIES_READ: &str = "arbor.entries.read";
/// Time spent reading and decoding a basket.
pub const BASKET_INFLATE: &str = "arbor.basket.inflate";
/// Size of flushed basket payloads before compression.
pub const BASKET_PAYLOAD: &str = "arbor.basket.payload";

/// A shared metric registry.
///
/// Clones share the same registry, so a registry handed to a reader can be inspected by its
/// owner while the reader runs.
#[derive(Clone, Default)]
pub struct ArborMetrics {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    registry: MetricRegistry,
    default_tags: DefaultTags,
}

/// Tags applied to every metric of an [`ArborMetrics`] snapshot.
#[derive(Default)]
pub struct DefaultTags(BTreeMap<Cow<'static, str>, Cow<'static, str>>);

impl<K, V> From<&[(K, V)]> for DefaultTags
where
    K: Clone + Into<Cow<'static, str>>,
    V: Clone + Into<Cow<'static, str>>,
{
    fn from(pairs: &[(K, V)]) -> Self {
        DefaultTags(
            pairs
                .iter()
                .map(|(k, v)| (k.clone().into(), v.clone().into()))
                .collect(),
        )
    }
}

impl ArborMetrics {
    /// Wrap `registry`, tagging snapshots with `default_tags`.
    pub fn new(registry: MetricRegistry, default_tags: impl Into<DefaultTags>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                default_tags: default_tags.into(),
            }),
        }
    }

    /// An empty registry with default tags.
    pub fn default_with_tags(default_tags: impl Into<DefaultTags>) -> Self {
        Self::new(MetricRegistry::default(), default_tags)
    }

    /// Returns the counter with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a counter.
    pub fn counter<T>(&self, id: T) -> Arc<Counter>
    where
        T: Into<MetricId>,
    {
        self.inner.registry.counter(id)
    }

    /// Returns the histogram with the specified ID, creating a default instance if absent.
    pub fn histogram<T>(&self, id: T) -> Arc<Histogram>
    where
        T: Into<MetricId>,
    {
        self.inner.registry.histogram(id)
    }

    /// Returns the timer with the specified ID, creating a default instance if absent.
    pub fn timer<T>(&self, id: T) -> Arc<Timer>
    where
        T: Into<MetricId>,
    {
        self.inner.registry.timer(id)
    }

    /// A snapshot of the registered metrics.
    pub fn metrics(&self) -> MetricsSnapshot<'_> {
        MetricsSnapshot {
            snapshot: self.inner.registry.metrics(),
            default_tags: &self.inner.default_tags,
        }
    }
}

/// A snapshot of the metrics in a registry with default tags.
pub struct MetricsSnapshot<'a> {
    snapshot: Metrics,
    default_tags: &'a DefaultTags,
}

impl MetricsSnapshot<'_> {
    /// Iterate over the metrics, each tagged with the default tags.
    pub fn iter(&self) -> ArborMetricsIter<'_> {
        ArborMetricsIter {
            iter: self.snapshot.iter(),
            default_tags: self.default_tags,
        }
    }
}

/// Iterator applying the default tags to each metric of a snapshot.
pub struct ArborMetricsIter<'a> {
    iter: MetricsIter<'a>,
    default_tags: &'a DefaultTags,
}

impl<'a> Iterator for ArborMetricsIter<'a> {
    type Item = (MetricId, &'a Metric);

    fn next(&mut self) -> Option<(MetricId, &'a Metric)> {
        self.iter.next().map(|(k, v)| {
            let id = self
                .default_tags
                .0
                .iter()
                .fold(k.clone(), |id, (key, value)| {
                    id.with_tag(key.clone(), value.clone())
                });
            (id, v)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}
