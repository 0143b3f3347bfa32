use crate::error::Result;

use std::fmt::{self, Debug};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream};

/// The replies to a multi-response request.
///
/// Handlers run only while the stream is polled, one at a time in
/// registration order, and each reply is yielded before the next handler is
/// invoked. Dropping the stream abandons the remaining handlers.
pub struct ResponseStream<T> {
    inner: BoxStream<'static, Result<T>>,
}

impl<T> ResponseStream<T> {
    pub(crate) fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl<T> Stream for ResponseStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> Debug for ResponseStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}
