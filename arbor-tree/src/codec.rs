//! Fetching and decoding the basket records of a branch.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use arbor_error::{ArborResult, ErrorContext, arbor_err};
use arbor_io::ReadAt;

use crate::basket::Basket;
use crate::branch::Branch;
use crate::metrics::{ArborMetrics, BASKET_INFLATE, BASKETS_DECODED, BYTES_READ};
use crate::span::Span;

/// Everything needed to turn a span of a branch into a decoded basket.
///
/// Cheap to clone, so the synchronous cursor and the read-ahead thread of a branch each own
/// one.
#[derive(Clone)]
pub struct BasketSource {
    reader: Arc<dyn ReadAt>,
    branch: Arc<str>,
    entry_offset_len: i32,
    resident: Option<Arc<Basket>>,
    metrics: ArborMetrics,
}

impl Debug for BasketSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasketSource")
            .field("branch", &self.branch)
            .field("entry_offset_len", &self.entry_offset_len)
            .field("resident", &self.resident.is_some())
            .finish_non_exhaustive()
    }
}

impl BasketSource {
    /// A source reading the baskets of `branch` from `reader`.
    pub fn new(reader: Arc<dyn ReadAt>, branch: &Branch, metrics: ArborMetrics) -> Self {
        Self {
            reader,
            branch: branch.name().into(),
            entry_offset_len: branch.entry_offset_len(),
            resident: branch.resident_basket().cloned().map(Arc::new),
            metrics,
        }
    }

    /// Name of the branch the baskets belong to.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Decode the basket of `span` into `basket`, reusing its buffers.
    ///
    /// Spans without an on-disk size designate the in-memory basket of the branch.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip(self, basket), fields(branch = %self.branch, span = %span))
    )]
    pub fn inflate(&self, span: &Span, basket: &mut Basket) -> ArborResult<()> {
        if span.is_resident() {
            let resident = self.resident.as_ref().ok_or_else(|| {
                arbor_err!(
                    MissingBasket: "branch {}: no in-memory basket for entries {}..{}",
                    self.branch,
                    span.beg,
                    span.end
                )
            })?;
            basket.clone_from(resident);
            self.metrics.counter(BASKETS_DECODED).inc();
            return Ok(());
        }

        let _timer = self.metrics.timer(BASKET_INFLATE).time();
        let end = span.pos + u64::from(span.size);
        let record = self
            .reader
            .read_byte_range(span.pos..end)
            .context(|| format!("branch {}: reading basket at {}", self.branch, span))?;
        basket
            .read_record(&record, self.entry_offset_len)
            .context(|| format!("branch {}: decoding basket at {}", self.branch, span))?;

        self.metrics.counter(BASKETS_DECODED).inc();
        self.metrics
            .counter(BYTES_READ)
            .add(i64::from(span.size));
        log::trace!(
            "branch {}: decoded basket {} into {} bytes",
            self.branch,
            span,
            basket.payload().len()
        );
        Ok(())
    }
}
