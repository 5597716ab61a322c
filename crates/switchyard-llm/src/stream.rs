//! Pull-based event streams
//!
//! Every token-by-token path is a `Stream` of `Result<T, LlmError>`. An
//! `Err` item is terminal: adapters in this module yield nothing after it.
//! Nothing here buffers beyond the per-step output queue of
//! [`ResultStreamExt::scan_items`].

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use futures_util::stream::FusedStream;
use pin_project_lite::pin_project;

use crate::error::LlmError;

/// Boxed fallible stream
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = Result<T, LlmError>> + Send>>;

/// Owning handle over a fallible stream with an explicit close
///
/// The underlying stream (and the connection it holds) is dropped on
/// `close`, on natural exhaustion, and after a terminal error.
pub struct EventStream<T> {
    inner: Option<BoxStream<T>>,
}

impl<T> EventStream<T> {
    /// Wrap a stream
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, LlmError>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(stream)),
        }
    }

    /// Release the underlying stream; safe to call more than once
    pub fn close(&mut self) {
        self.inner = None;
    }

    /// Whether the stream has been closed or has ended
    pub const fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").field("closed", &self.is_closed()).finish()
    }
}

impl<T> Stream for EventStream<T> {
    type Item = Result<T, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };

        let item = ready!(inner.as_mut().poll_next(cx));
        if !matches!(item, Some(Ok(_))) {
            self.inner = None;
        }

        Poll::Ready(item)
    }
}

impl<T> FusedStream for EventStream<T> {
    fn is_terminated(&self) -> bool {
        self.is_closed()
    }
}

/// Combinators over fallible streams
pub trait ResultStreamExt<T>: Stream<Item = Result<T, LlmError>> + Send + Sized + 'static {
    /// Map each input to zero or more outputs
    ///
    /// Outputs of one input are queued and drained before the next input
    /// is pulled. An error from `step` terminates the stream.
    fn flat_map_items<U, I, F>(self, mut step: F) -> BoxStream<U>
    where
        F: FnMut(T) -> Result<I, LlmError> + Send + 'static,
        I: IntoIterator<Item = U>,
        U: Send + 'static,
    {
        self.scan_items((), move |_: &mut (), item| step(item), |()| Ok(Vec::new()))
    }

    /// Map each input to zero or more outputs through `state`, then hand
    /// the state to `end` for a trailer
    ///
    /// `end` runs once, when the source is exhausted. It never runs after
    /// an error, whether from the source or from `step`.
    fn scan_items<St, U, I, F, E>(self, state: St, step: F, end: E) -> BoxStream<U>
    where
        St: Send + 'static,
        F: FnMut(&mut St, T) -> Result<I, LlmError> + Send + 'static,
        E: FnOnce(St) -> Result<Vec<U>, LlmError> + Send + 'static,
        I: IntoIterator<Item = U>,
        U: Send + 'static,
    {
        Box::pin(ScanItems {
            inner: self,
            state: Some(state),
            step,
            end: Some(end),
            queue: VecDeque::new(),
            finished: false,
        })
    }

    /// Map each item
    fn map_items<U, F>(self, mut f: F) -> BoxStream<U>
    where
        F: FnMut(T) -> U + Send + 'static,
        U: Send + 'static,
    {
        self.flat_map_items(move |item| Ok(Some(f(item))))
    }

    /// Map each item, terminating the stream on the first error
    fn try_map_items<U, F>(self, mut f: F) -> BoxStream<U>
    where
        F: FnMut(T) -> Result<U, LlmError> + Send + 'static,
        U: Send + 'static,
    {
        self.flat_map_items(move |item| f(item).map(Some))
    }

    /// Keep only the items matching `predicate`
    fn filter_items<F>(self, mut predicate: F) -> BoxStream<T>
    where
        F: FnMut(&T) -> bool + Send + 'static,
        T: Send + 'static,
    {
        self.flat_map_items(move |item| Ok(predicate(&item).then_some(item)))
    }

    /// Continue with `next` once this stream is exhausted
    ///
    /// `next` is never polled if this stream ends with an error.
    fn append<S>(self, next: S) -> BoxStream<T>
    where
        S: Stream<Item = Result<T, LlmError>> + Send + 'static,
    {
        Box::pin(Append {
            first: self,
            second: next,
            stage: Stage::First,
        })
    }
}

impl<T, S> ResultStreamExt<T> for S where S: Stream<Item = Result<T, LlmError>> + Send + Sized + 'static {}

pin_project! {
    struct ScanItems<S, St, F, E, U> {
        #[pin]
        inner: S,
        state: Option<St>,
        step: F,
        end: Option<E>,
        queue: VecDeque<U>,
        finished: bool,
    }
}

impl<S, St, F, E, T, I, U> Stream for ScanItems<S, St, F, E, U>
where
    S: Stream<Item = Result<T, LlmError>>,
    F: FnMut(&mut St, T) -> Result<I, LlmError>,
    E: FnOnce(St) -> Result<Vec<U>, LlmError>,
    I: IntoIterator<Item = U>,
{
    type Item = Result<U, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.queue.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }

            if *this.finished {
                return Poll::Ready(None);
            }

            let Some(state) = this.state.as_mut() else {
                *this.finished = true;
                continue;
            };

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(item)) => match (this.step)(state, item) {
                    Ok(outputs) => this.queue.extend(outputs),
                    Err(e) => {
                        *this.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    *this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    *this.finished = true;
                    if let (Some(state), Some(end)) = (this.state.take(), this.end.take()) {
                        match end(state) {
                            Ok(outputs) => this.queue.extend(outputs),
                            Err(e) => return Poll::Ready(Some(Err(e))),
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    First,
    Second,
    Done,
}

pin_project! {
    struct Append<A, B> {
        #[pin]
        first: A,
        #[pin]
        second: B,
        stage: Stage,
    }
}

impl<A, B, T> Stream for Append<A, B>
where
    A: Stream<Item = Result<T, LlmError>>,
    B: Stream<Item = Result<T, LlmError>>,
{
    type Item = Result<T, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            let item = match *this.stage {
                Stage::First => ready!(this.first.as_mut().poll_next(cx)),
                Stage::Second => ready!(this.second.as_mut().poll_next(cx)),
                Stage::Done => return Poll::Ready(None),
            };

            match item {
                Some(Ok(item)) => return Poll::Ready(Some(Ok(item))),
                Some(Err(e)) => {
                    *this.stage = Stage::Done;
                    return Poll::Ready(Some(Err(e)));
                }
                None if *this.stage == Stage::First => *this.stage = Stage::Second,
                None => {
                    *this.stage = Stage::Done;
                    return Poll::Ready(None);
                }
            }
        }
    }
}
