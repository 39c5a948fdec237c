//! Ordered event delivery per conversation.
//!
//! Each session key gets one worker task draining its own queue, so events
//! of one conversation are handled strictly in arrival order while other
//! conversations proceed in parallel. Lanes with nothing queued and unused
//! for `idle` are closed; their worker exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channels::IncomingEvent;
use crate::engine::dispatcher::CommandEngine;
use crate::engine::session::SessionKey;

struct Lane {
    tx: mpsc::UnboundedSender<IncomingEvent>,
    worker: JoinHandle<()>,
    /// Events queued or being handled.
    pending: Arc<AtomicUsize>,
    last_used: Instant,
}

/// Routes inbound events to one sequential worker per session.
pub struct EventLanes {
    engine: Arc<CommandEngine>,
    lanes: HashMap<SessionKey, Lane>,
    /// Workers of dropped lanes still finishing their queue.
    retired: Vec<JoinHandle<()>>,
    idle: Duration,
}

impl EventLanes {
    pub fn new(engine: Arc<CommandEngine>, idle: Duration) -> Self {
        Self {
            engine,
            lanes: HashMap::new(),
            retired: Vec::new(),
            idle,
        }
    }

    /// Queue `event` behind earlier events of the same conversation.
    pub fn dispatch(&mut self, event: IncomingEvent) {
        let now = Instant::now();
        self.retire_idle(now);

        let key = SessionKey::from_event(&event);
        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| spawn_lane(Arc::clone(&self.engine), &key));
        lane.last_used = now;
        lane.pending.fetch_add(1, Ordering::SeqCst);

        if let Err(mpsc::error::SendError(event)) = lane.tx.send(event) {
            tracing::warn!(session = %key, "Event lane closed, restarting it");
            let lane = spawn_lane(Arc::clone(&self.engine), &key);
            lane.pending.fetch_add(1, Ordering::SeqCst);
            // A fresh receiver is alive until its sender is dropped
            let _ = lane.tx.send(event);
            if let Some(old) = self.lanes.insert(key, lane) {
                self.retired.push(old.worker);
            }
        }
    }

    fn retire_idle(&mut self, now: Instant) {
        self.retired.retain(|worker| !worker.is_finished());
        let idle: Vec<SessionKey> = self
            .lanes
            .iter()
            .filter(|(_, lane)| {
                lane.pending.load(Ordering::SeqCst) == 0
                    && now.duration_since(lane.last_used) >= self.idle
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in idle {
            if let Some(lane) = self.lanes.remove(&key) {
                tracing::debug!(session = %key, "Closing idle event lane");
                self.retired.push(lane.worker);
            }
        }
    }

    /// Number of live lanes.
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Events queued or in progress across all lanes.
    pub fn pending(&self) -> usize {
        self.lanes
            .values()
            .map(|lane| lane.pending.load(Ordering::SeqCst))
            .sum()
    }

    /// Stop accepting events and wait for every queued one to be handled.
    pub async fn drain(self) {
        let mut workers = self.retired;
        workers.extend(self.lanes.into_values().map(|lane| {
            drop(lane.tx);
            lane.worker
        }));
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Event lane worker failed: {}", e);
            }
        }
    }
}

fn spawn_lane(engine: Arc<CommandEngine>, key: &SessionKey) -> Lane {
    let (tx, mut rx) = mpsc::unbounded_channel::<IncomingEvent>();
    let pending = Arc::new(AtomicUsize::new(0));
    tracing::debug!(session = %key, "Opening event lane");
    let counter = Arc::clone(&pending);
    let worker = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = engine.handle_event(event).await {
                tracing::error!("Error handling event: {}", e);
            }
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    });
    Lane {
        tx,
        worker,
        pending,
        last_used: Instant::now(),
    }
}
