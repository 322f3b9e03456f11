// ── Change streams ──
//
// `Stream` adapter over the change broadcast for async consumers.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_core::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::model::ChangeEvent;

/// Yields every change event published after it was created.
///
/// A consumer that falls behind the channel capacity loses the oldest
/// events; the gap is logged and the stream carries on.
pub struct ChangeStream {
    inner: BroadcastStream<ChangeEvent>,
}

impl ChangeStream {
    pub(crate) fn new(receiver: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
        }
    }
}

impl Stream for ChangeStream {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(event)) => return Poll::Ready(Some(event)),
                Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                    warn!(missed, "change stream lagged; events dropped");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
