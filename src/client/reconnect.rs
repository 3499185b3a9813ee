use std::{future::Future, pin::Pin, time::Duration};

use futures_util::{Stream, StreamExt};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::events::{Envelope, EventKind};

use super::backoff::{Backoff, RetryPolicy};

pub type EnvelopeStream = Pin<Box<dyn Stream<Item = anyhow::Result<Envelope>> + Send>>;

/// Opens one push connection. The stream ending or yielding an error counts
/// as a disconnect.
pub trait Connect: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = anyhow::Result<EnvelopeStream>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// `attempt` is 0 for the first connection and counts up through the
    /// reconnects made since the last open connection.
    Connecting { attempt: u32 },
    Open,
    /// Retry budget exhausted; no further events will arrive.
    Closed,
}

/// Handle to a self-healing push connection. Dropping it stops the
/// reconnect task.
pub struct Subscription {
    events: mpsc::Receiver<Envelope>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Envelope> {
        self.events.recv().await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `idle_timeout` drops a connection that has delivered nothing, heartbeats
/// included, for that long.
pub fn spawn<C: Connect>(connector: C, policy: RetryPolicy, idle_timeout: Option<Duration>) -> Subscription {
    let (events_tx, events) = mpsc::channel(64);
    let (state_tx, state) = watch::channel(ConnectionState::Connecting { attempt: 0 });
    let task = tokio::spawn(run(connector, policy, idle_timeout, events_tx, state_tx));
    Subscription { events, state, task }
}

async fn run<C: Connect>(
    connector: C,
    policy: RetryPolicy,
    idle_timeout: Option<Duration>,
    events: mpsc::Sender<Envelope>,
    state: watch::Sender<ConnectionState>,
) {
    let mut backoff = Backoff::new(policy);
    loop {
        match connector.connect().await {
            Ok(mut stream) => {
                state.send_replace(ConnectionState::Open);
                backoff.reset();
                loop {
                    let next = match idle_timeout {
                        Some(idle) => match tokio::time::timeout(idle, stream.next()).await {
                            Ok(next) => next,
                            Err(_) => {
                                tracing::warn!(?idle, "push stream went quiet");
                                break;
                            }
                        },
                        None => stream.next().await,
                    };
                    match next {
                        Some(Ok(envelope)) if envelope.kind == EventKind::Heartbeat => {}
                        Some(Ok(envelope)) => {
                            if events.send(envelope).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "push stream dropped");
                            break;
                        }
                        None => break,
                    }
                }
            }
            Err(e) => tracing::warn!(attempt = backoff.attempt(), error = %e, "push connect failed"),
        }

        if events.is_closed() {
            return;
        }
        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(attempts = backoff.attempt(), "giving up on push connection");
            state.send_replace(ConnectionState::Closed);
            return;
        };
        state.send_replace(ConnectionState::Connecting { attempt: backoff.attempt() });
        tracing::debug!(?delay, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use futures_util::stream;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;

    /// Replays scripted outcomes, then holds an open, silent connection.
    struct Scripted {
        script: Mutex<VecDeque<Option<Vec<Envelope>>>>,
        exhausted_fails: bool,
    }

    impl Scripted {
        fn new(script: Vec<Option<Vec<Envelope>>>, exhausted_fails: bool) -> Self {
            Self { script: Mutex::new(script.into()), exhausted_fails }
        }
    }

    impl Connect for Scripted {
        async fn connect(&self) -> anyhow::Result<EnvelopeStream> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Some(events)) => Ok(Box::pin(stream::iter(events.into_iter().map(Ok)))),
                Some(None) => Err(anyhow::anyhow!("connection refused")),
                None if self.exhausted_fails => Err(anyhow::anyhow!("connection refused")),
                None => Ok(Box::pin(stream::pending())),
            }
        }
    }

    fn message(n: u32) -> Envelope {
        Envelope::new(EventKind::Message, json!({ "n": n }))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_doubling_delay_then_delivers() {
        let start = Instant::now();
        let mut sub = spawn(
            Scripted::new(vec![None, None, None, Some(vec![message(1)])], false),
            RetryPolicy::unbounded(),
            None,
        );

        assert_eq!(sub.next().await, Some(message(1)));
        // 1s + 2s + 4s of backoff before the fourth attempt
        assert_eq!(start.elapsed().as_secs(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_the_stream_ends() {
        let mut sub = spawn(
            Scripted::new(vec![Some(vec![message(1)]), Some(vec![message(2)])], false),
            RetryPolicy::unbounded(),
            None,
        );

        assert_eq!(sub.next().await, Some(message(1)));
        assert_eq!(sub.next().await, Some(message(2)));

        let mut state = sub.watch_state();
        state.wait_for(|s| *s == ConnectionState::Open).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_closes() {
        let start = Instant::now();
        let mut sub = spawn(Scripted::new(vec![], true), RetryPolicy::bounded(2), None);

        assert_eq!(sub.next().await, None);
        assert_eq!(sub.state(), ConnectionState::Closed);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_attempts_while_connecting() {
        let sub = spawn(Scripted::new(vec![], true), RetryPolicy::unbounded(), None);

        let mut state = sub.watch_state();
        let seen = *state
            .wait_for(|s| *s == ConnectionState::Connecting { attempt: 2 })
            .await
            .unwrap();
        assert_eq!(seen, ConnectionState::Connecting { attempt: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stream_reports_connecting_until_reopened() {
        let mut sub = spawn(
            Scripted::new(vec![Some(vec![message(1)]), None], false),
            RetryPolicy::unbounded(),
            None,
        );
        assert_eq!(sub.next().await, Some(message(1)));

        let mut state = sub.watch_state();
        state.wait_for(|s| matches!(s, ConnectionState::Connecting { .. })).await.unwrap();
        let start = Instant::now();
        state.wait_for(|s| *s == ConnectionState::Open).await.unwrap();
        // one refused attempt in between: 1s, then 2s
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_stream_is_treated_as_dropped() {
        let sub = spawn(Scripted::new(vec![], false), RetryPolicy::unbounded(), Some(Duration::from_secs(10)));

        let mut state = sub.watch_state();
        state.wait_for(|s| *s == ConnectionState::Open).await.unwrap();
        let start = Instant::now();
        state.wait_for(|s| matches!(s, ConnectionState::Connecting { .. })).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    /// An open connection that only ever sends heartbeats.
    struct Beating(Duration);

    impl Connect for Beating {
        async fn connect(&self) -> anyhow::Result<EnvelopeStream> {
            let every = self.0;
            Ok(Box::pin(stream::unfold((), move |()| async move {
                tokio::time::sleep(every).await;
                Some((Ok(Envelope::heartbeat()), ()))
            })))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_the_connection_without_surfacing() {
        let mut sub = spawn(Beating(Duration::from_secs(5)), RetryPolicy::unbounded(), Some(Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sub.state(), ConnectionState::Open);
        assert!(sub.events.try_recv().is_err());
    }
}
