//! # Heartbeat
//!
//! Two liveness mechanisms:
//!
//! - **Broadcast beat**: [`HeartbeatPublisher`] publishes the topic
//!   `heartbeat` every interval; [`HeartbeatMonitor`] records when it last
//!   heard one and reports [`LivenessEvent`]s.
//! - **Ping**: [`Pinger`] sends `PING` over DEALER and times the `PONG`
//!   answered by [`PingResponder`] over ROUTER.
//!
//! ## Monitor timing
//!
//! ```text
//! receive task ── beat ──▶ last_seen (AtomicU64, ms since start)
//!                                │
//! checker task (every timeout/2) ┘── silent > timeout ──▶ Timeout (once)
//! receive task ── beat after Timeout ──────────────────▶ Recovered
//! ```
//!
//! The timed-out flag lives in the top bit of `last_seen`, so a checker can
//! only raise it with a compare-and-swap against the beat it observed. Both
//! tasks make their transition and send the event under one lock, so
//! `Recovered` never overtakes the `Timeout` it ends.
//!
//! There is no reconnection: the monitor only reports.

use crate::error::PatternError;
use crate::pub_sub::{PublisherNode, SubscriberNode};
use crate::router_dealer::{DealerNode, RequestHandler, RouterNode};
use crate::{HEARTBEAT_TOPIC, PING, PONG};
use async_trait::async_trait;
use bytes::Bytes;
use mj_telemetry::{HEARTBEAT_TIMEOUTS, PINGS, PING_RTT};
use mj_transport::{Frame, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

// `tokio::time::interval` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Liveness transitions reported by [`HeartbeatMonitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessEvent {
    /// No beat for longer than the timeout. Sent once per silence window.
    Timeout { silent_for: Duration },
    /// A beat arrived after a timeout.
    Recovered,
}

pub struct HeartbeatPublisher {
    publisher: PublisherNode,
    interval: Duration,
}

impl HeartbeatPublisher {
    pub async fn bind(
        transport: &dyn Transport,
        address: &str,
        interval: Duration,
    ) -> Result<Self, PatternError> {
        let publisher = PublisherNode::bind(transport, address).await?;
        Ok(Self {
            publisher,
            interval,
        })
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Publish a single beat.
    pub async fn beat(&self) -> Result<(), PatternError> {
        self.publisher.publish_topic(HEARTBEAT_TOPIC).await
    }

    /// Beat every interval, forever. Send failures are logged.
    pub async fn run(&self) -> Result<(), PatternError> {
        let mut ticker = interval(self.interval.max(MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.beat().await {
                Ok(()) => trace!("Heartbeat sent"),
                Err(e) if e.is_closed() => return Ok(()),
                Err(e) => warn!(error = %e, "Error publishing heartbeat"),
            }
        }
    }
}

const TIMED_OUT: u64 = 1 << 63;

/// Shared between the receive and checker tasks.
///
/// `last_seen` holds milliseconds since `start` in the low 63 bits and the
/// timed-out flag in the top bit.
struct LivenessState {
    start: Instant,
    last_seen: AtomicU64,
}

impl LivenessState {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_seen: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis())
            .unwrap_or(u64::MAX)
            .min(TIMED_OUT - 1)
    }

    /// Record a beat. Returns true when this ends a silence window.
    fn record_beat(&self) -> bool {
        let previous = self.last_seen.swap(self.now_ms(), Ordering::AcqRel);
        previous & TIMED_OUT != 0
    }

    /// Returns the silence length when it crosses `timeout` for the first
    /// time in the current window.
    fn check(&self, timeout: Duration) -> Option<Duration> {
        let observed = self.last_seen.load(Ordering::Acquire);
        if observed & TIMED_OUT != 0 {
            return None;
        }
        let silent_for = Duration::from_millis(self.now_ms().saturating_sub(observed));
        if silent_for <= timeout {
            return None;
        }
        self.flag_timeout(observed).then_some(silent_for)
    }

    /// Raise the timed-out flag unless a beat landed after `observed` was
    /// read.
    fn flag_timeout(&self, observed: u64) -> bool {
        self.last_seen
            .compare_exchange(
                observed,
                observed | TIMED_OUT,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

pub struct HeartbeatMonitor {
    subscriber: SubscriberNode,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub async fn connect(
        transport: &dyn Transport,
        address: &str,
        timeout: Duration,
    ) -> Result<Self, PatternError> {
        let subscriber = SubscriberNode::connect(transport, address).await?;
        subscriber.subscribe(HEARTBEAT_TOPIC)?;
        Ok(Self {
            subscriber,
            timeout,
        })
    }

    /// Start the receive and checker tasks.
    ///
    /// The silence window starts now. Dropping the returned watch stops
    /// both tasks.
    #[must_use]
    pub fn spawn(self) -> LivenessWatch {
        let (events_tx, events_rx) = mpsc::channel(16);
        let events_tx = Arc::new(AsyncMutex::new(events_tx));
        let state = Arc::new(LivenessState::new());
        let timeout = self.timeout;
        let subscriber = self.subscriber;

        let receiver = {
            let state = state.clone();
            let events = events_tx.clone();
            tokio::spawn(async move {
                loop {
                    match subscriber.receive().await {
                        Ok((topic, _)) if topic == HEARTBEAT_TOPIC => {
                            trace!("Heartbeat received");
                            let sink = events.lock().await;
                            if state.record_beat() {
                                info!("Heartbeat recovered");
                                if sink.send(LivenessEvent::Recovered).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Ok((topic, _)) => debug!(%topic, "Ignoring non-heartbeat message"),
                        Err(e) if e.is_closed() => return,
                        Err(e) => warn!(error = %e, "Error receiving heartbeat"),
                    }
                }
            })
        };

        let checker = tokio::spawn(async move {
            let mut ticker = interval((timeout / 2).max(MIN_PERIOD));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sink = events_tx.lock().await;
                if let Some(silent_for) = state.check(timeout) {
                    HEARTBEAT_TIMEOUTS.inc();
                    warn!(
                        silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX),
                        "Heartbeat timeout detected"
                    );
                    if sink
                        .send(LivenessEvent::Timeout { silent_for })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        });

        LivenessWatch {
            events: events_rx,
            tasks: vec![receiver, checker],
        }
    }
}

/// Receives [`LivenessEvent`]s from a running monitor.
pub struct LivenessWatch {
    events: mpsc::Receiver<LivenessEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl LivenessWatch {
    /// Next liveness transition, or `None` once the monitor has stopped.
    pub async fn next(&mut self) -> Option<LivenessEvent> {
        self.events.recv().await
    }
}

impl Drop for LivenessWatch {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Answers `PING` with `PONG` over ROUTER.
pub struct PingResponder {
    router: RouterNode,
}

struct PongHandler;

#[async_trait]
impl RequestHandler for PongHandler {
    async fn handle(&self, identity: &Frame, payload: Bytes) -> Result<Option<Bytes>, PatternError> {
        if payload.as_ref() != PING {
            debug!(identity_len = identity.len(), "Ignoring non-PING request");
            return Ok(None);
        }
        PINGS.inc();
        Ok(Some(Bytes::from_static(PONG)))
    }
}

/// Answer `payload` if it is a `PING`. Shared with services that multiplex
/// pings onto their request socket.
pub async fn answer_ping(identity: &Frame, payload: Bytes) -> Option<Bytes> {
    PongHandler.handle(identity, payload).await.ok().flatten()
}

impl PingResponder {
    pub async fn bind(transport: &dyn Transport, address: &str) -> Result<Self, PatternError> {
        Ok(Self {
            router: RouterNode::bind(transport, address).await?,
        })
    }

    /// Answer pings until the socket closes.
    pub async fn serve(&self) -> Result<(), PatternError> {
        self.router.serve(&PongHandler).await
    }
}

/// Sends `PING` over DEALER and measures the round trip.
pub struct Pinger {
    dealer: DealerNode,
}

impl Pinger {
    pub async fn connect(transport: &dyn Transport, address: &str) -> Result<Self, PatternError> {
        Ok(Self {
            dealer: DealerNode::connect(transport, address).await?,
        })
    }

    /// Round-trip time of one `PING`. Waits indefinitely; wrap in
    /// `tokio::time::timeout` for a bound.
    pub async fn ping(&self) -> Result<Duration, PatternError> {
        let start = Instant::now();
        self.dealer.send_to_server(Bytes::from_static(PING)).await?;
        loop {
            let reply = self.dealer.receive_from_server().await?;
            if reply.as_ref() == PONG {
                let rtt = start.elapsed();
                PING_RTT.observe(rtt.as_secs_f64());
                return Ok(rtt);
            }
            debug!("Ignoring non-PONG reply");
        }
    }
}
