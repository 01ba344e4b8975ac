//! Read-ahead of the baskets of one branch on a background thread.
//!
//! The producer thread owns a fixed set of basket buffers. It decodes baskets into free buffers
//! and hands them to the consumer through the `ready` channel; the consumer gives each buffer
//! back through the `reuse` channel before asking for the next one. A buffer is thus touched by
//! one side at a time, and at most `n` decoded baskets exist at once.

use std::ops::Range;
use std::panic::resume_unwind;
use std::thread::JoinHandle;

use arbor_error::{ArborResult, arbor_err};
use flume::{Receiver, RecvError, Selector, Sender, TryRecvError};

use crate::basket::Basket;
use crate::codec::BasketSource;
use crate::options::Concurrency;
use crate::span::{Span, find_baskets};

/// A decoded basket handed to the consumer.
#[derive(Debug, Clone, Default)]
pub struct ReadyBasket {
    /// Index of the basket in the span table of its branch.
    pub id: usize,
    /// Entries and location of the basket.
    pub span: Span,
    /// The decoded basket.
    pub basket: Basket,
}

/// Decodes the baskets covering a range of entries ahead of the consumer.
#[derive(Debug)]
pub struct Prefetcher {
    branch: String,
    ready: Receiver<ArborResult<ReadyBasket>>,
    reuse: Sender<Basket>,
    held: Option<ReadyBasket>,
    exit: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    baskets: Range<usize>,
}

impl Prefetcher {
    /// Start decoding the baskets of `spans` that hold the entries of `range`.
    ///
    /// The number of buffers comes from `concurrency`, clamped to the number of baskets.
    pub fn spawn(
        source: BasketSource,
        spans: &[Span],
        range: Range<u64>,
        concurrency: Concurrency,
    ) -> ArborResult<Self> {
        let baskets = if range.is_empty() {
            0..0
        } else {
            find_baskets(spans, range.start, range.end).unwrap_or(0..0)
        };
        let n = concurrency.resolve(baskets.len());
        let (ready_tx, ready) = flume::bounded(n);
        let (reuse, reuse_rx) = flume::bounded(n);
        let (exit, exit_rx) = flume::bounded::<()>(1);
        for _ in 0..n {
            reuse
                .send(Basket::default())
                .map_err(|_| arbor_err!(Shutdown: "prefetch buffers closed before start"))?;
        }

        let branch = source.branch().to_string();
        let work = baskets
            .clone()
            .filter_map(|id| spans.get(id).map(|span| (id, *span)))
            .collect::<Vec<_>>();
        log::debug!(
            "branch {}: prefetching baskets {}..{} with {} buffers",
            branch,
            baskets.start,
            baskets.end,
            n
        );

        let handle = std::thread::Builder::new()
            .name(format!("arbor-prefetch-{branch}"))
            .spawn(move || produce(&source, work, &ready_tx, &reuse_rx, &exit_rx))?;

        Ok(Self {
            branch,
            ready,
            reuse,
            held: None,
            exit: Some(exit),
            handle: Some(handle),
            baskets,
        })
    }

    /// Indices, in the span table, of the baskets being decoded.
    pub fn baskets(&self) -> Range<usize> {
        self.baskets.clone()
    }

    /// The basket returned by the last [`read`](Self::read).
    pub fn current(&self) -> Option<&ReadyBasket> {
        self.held.as_ref()
    }

    /// Give back the current basket and wait for the next one.
    ///
    /// Returns `None` once every basket of the range was delivered, or after [`close`](Self::close).
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), fields(branch = %self.branch)))]
    pub fn read(&mut self) -> ArborResult<Option<&ReadyBasket>> {
        if let Some(prev) = self.held.take() {
            if self.reuse.send(prev.basket).is_err() {
                log::trace!("branch {}: producer gone, dropping buffer", self.branch);
            }
        }
        match self.ready.recv() {
            Ok(Ok(next)) => {
                self.held = Some(next);
                Ok(self.held.as_ref())
            }
            Ok(Err(err)) => Err(err),
            Err(RecvError::Disconnected) => Ok(None),
        }
    }

    /// Stop decoding and wait for the producer thread. Closing twice is a no-op.
    ///
    /// A panic of the producer is propagated, unless the calling thread is already unwinding.
    pub fn close(&mut self) {
        self.exit.take();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.join() {
                if std::thread::panicking() {
                    log::warn!("branch {}: prefetch thread panicked", self.branch);
                    return;
                }
                resume_unwind(err);
            }
            log::debug!("branch {}: prefetch stopped", self.branch);
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn produce(
    source: &BasketSource,
    work: Vec<(usize, Span)>,
    ready: &Sender<ArborResult<ReadyBasket>>,
    reuse: &Receiver<Basket>,
    exit: &Receiver<()>,
) {
    for (id, span) in work {
        if matches!(exit.try_recv(), Err(TryRecvError::Disconnected)) {
            return;
        }
        let slot = Selector::new()
            .recv(reuse, Result::ok)
            .recv(exit, |_| None)
            .wait();
        let Some(mut basket) = slot else {
            return;
        };

        let result = source
            .inflate(&span, &mut basket)
            .map(|()| ReadyBasket { id, span, basket })
            .map_err(|err| err.with_context(format!("prefetching basket {id} of {}", source.branch())));
        let failed = result.is_err();
        if ready.send(result).is_err() || failed {
            return;
        }
    }
}
