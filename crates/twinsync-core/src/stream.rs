// ── Dispatcher event stream ──
//
// `Stream` view over the dispatcher's broadcast channel for async
// consumers. Lagged receivers skip ahead instead of ending the stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::dispatcher::DispatchEvent;

pub struct EventStream {
    inner: BroadcastStream<Arc<DispatchEvent>>,
}

impl EventStream {
    pub(crate) fn new(receiver: broadcast::Receiver<Arc<DispatchEvent>>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
        }
    }
}

impl Stream for EventStream {
    type Item = Arc<DispatchEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "event stream lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::future::poll_fn;

    use super::*;
    use crate::config::SyncConfig;
    use crate::dispatcher::EventDispatcher;

    #[tokio::test]
    async fn stream_yields_dispatcher_events() {
        let dispatcher = EventDispatcher::new(SyncConfig::default());
        let mut stream = dispatcher.event_stream().unwrap();
        dispatcher.log_debug("hello").unwrap();

        let event = poll_fn(|cx| Pin::new(&mut stream).poll_next(cx)).await.unwrap();
        assert!(matches!(&*event, DispatchEvent::Log { message, .. } if message == "hello"));
    }

    #[tokio::test]
    async fn lagged_stream_skips_ahead() {
        let config = SyncConfig {
            event_channel_capacity: 1,
            ..SyncConfig::default()
        };
        let dispatcher = EventDispatcher::new(config);
        let mut stream = dispatcher.event_stream().unwrap();
        dispatcher.log_debug("first").unwrap();
        dispatcher.log_debug("second").unwrap();

        let event = poll_fn(|cx| Pin::new(&mut stream).poll_next(cx)).await.unwrap();
        assert!(matches!(&*event, DispatchEvent::Log { message, .. } if message == "second"));
    }
}
