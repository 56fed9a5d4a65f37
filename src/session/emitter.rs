//! Emission sinks.

use futures_util::stream::Stream;
use tokio::sync::mpsc;

use crate::models::{CorrelationId, Emission, Operation};

/// Receives every emission of an operation.
///
/// Emitting never blocks and never fails from the operation's point of view.
/// A sink that can no longer deliver drops the emission.
pub trait Emitter: Send + Sync {
    fn emit(&self, emission: Emission);
}

impl<F> Emitter for F
where
    F: Fn(Emission) + Send + Sync,
{
    fn emit(&self, emission: Emission) {
        self(emission)
    }
}

/// Emitter backed by an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<Emission>,
}

impl ChannelEmitter {
    /// Create an emitter and the subscription reading from it
    pub fn new() -> (Self, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Subscription { rx })
    }
}

impl Emitter for ChannelEmitter {
    fn emit(&self, emission: Emission) {
        if self.tx.send(emission).is_err() {
            tracing::trace!("Subscription closed, dropping emission");
        }
    }
}

/// Receiving end of a [`ChannelEmitter`]
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Emission>,
}

impl Subscription {
    /// Next emission, `None` once every emitter is gone
    pub async fn recv(&mut self) -> Option<Emission> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Emission> {
        self.rx.try_recv().ok()
    }

    /// Everything emitted so far
    pub fn drain(&mut self) -> Vec<Emission> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Emissions for `correlation_id` received so far
    pub fn drain_for(&mut self, correlation_id: CorrelationId) -> Vec<Emission> {
        self.drain()
            .into_iter()
            .filter(|e| e.correlation_id == correlation_id)
            .collect()
    }

    /// Receive until the terminal emission of `operation` for `correlation_id`
    pub async fn until_terminal(
        &mut self,
        operation: Operation,
        correlation_id: CorrelationId,
    ) -> Vec<Emission> {
        let mut out = Vec::new();
        while let Some(emission) = self.recv().await {
            if emission.correlation_id != correlation_id {
                continue;
            }
            let last = operation.is_terminal(&emission.payload);
            out.push(emission);
            if last {
                break;
            }
        }
        out
    }

    pub fn into_stream(mut self) -> impl Stream<Item = Emission> {
        async_stream::stream! {
            while let Some(emission) = self.rx.recv().await {
                yield emission;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use futures_util::StreamExt;
    use std::sync::{Arc, Mutex};

    fn done(id: CorrelationId) -> Emission {
        Emission {
            event: Operation::Search.result_event(),
            correlation_id: id,
            payload: Payload::done(),
        }
    }

    #[tokio::test]
    async fn test_channel_emitter_delivers_in_order() {
        let (emitter, mut sub) = ChannelEmitter::new();
        emitter.emit(done(1));
        emitter.emit(done(2));

        let ids: Vec<_> = sub.drain().into_iter().map(|e| e.correlation_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_emit_after_subscription_dropped_is_silent() {
        let (emitter, sub) = ChannelEmitter::new();
        drop(sub);
        emitter.emit(done(1));
    }

    #[tokio::test]
    async fn test_into_stream_ends_with_emitters() {
        let (emitter, sub) = ChannelEmitter::new();
        emitter.emit(done(7));
        drop(emitter);

        let all: Vec<_> = sub.into_stream().collect().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].correlation_id, 7);
    }

    #[tokio::test]
    async fn test_until_terminal_stops_at_locator() {
        let (emitter, mut sub) = ChannelEmitter::new();
        let op = Operation::MangaFromChapterUrl;
        emitter.emit(done(9));
        emitter.emit(Emission {
            event: op.result_event(),
            correlation_id: 4,
            payload: Payload::Located(None),
        });
        emitter.emit(done(4));

        let got = sub.until_terminal(op, 4).await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, Payload::Located(None));
        assert_eq!(sub.drain().len(), 1);
    }

    #[test]
    fn test_closure_emitter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let emitter = move |e: Emission| sink.lock().unwrap().push(e.correlation_id);

        emitter.emit(done(3));
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }
}
