// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Redis Streams routing fabric.
//
// Layout inside the broker:
//   scanweave:queues              SET of queue names
//   scanweave:bindings:{queue}    SET of selectors bound to the queue
//   scanweave:queue:{queue}       STREAM of {topic, payload} entries
//   scanweave:pending             counter of unsettled entries
//   scanweave:last_activity       unix millis of the last publish/settle
//
// Every queue has one consumer group; replicas are consumers within it, so
// each entry goes to exactly one replica. Entries stay in the group's
// pending list until XACK. A replica restarted under its old consumer name
// reads its own pending entries first. Entries left pending longer than the
// claim idle time (CLAIM_MIN_IDLE by default) by a consumer that never came
// back are taken over with XAUTOCLAIM, on subscribe and then every
// CLAIM_EVERY.

use crate::domain::bus::{
    Acknowledger, ActivitySnapshot, BusError, Delivery, MessageBus, Subscription,
};
use crate::domain::message::{any_selector_matches, Envelope};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadReply};
use redis::AsyncCommands;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const QUEUES_KEY: &str = "scanweave:queues";
const PENDING_KEY: &str = "scanweave:pending";
const ACTIVITY_KEY: &str = "scanweave:last_activity";
const GROUP: &str = "agents";
const READ_BATCH: usize = 16;
const EMPTY_POLL: Duration = Duration::from_millis(200);
const CLAIM_MIN_IDLE: Duration = Duration::from_secs(60);
const CLAIM_EVERY: Duration = Duration::from_secs(30);
const CLAIM_DONE: &str = "0-0";

fn bindings_key(queue: &str) -> String {
    format!("scanweave:bindings:{}", queue)
}

fn stream_key(queue: &str) -> String {
    format!("scanweave:queue:{}", queue)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn bus_err(context: &str, e: redis::RedisError) -> BusError {
    BusError::Connection(format!("{}: {}", context, e))
}

#[derive(Clone)]
pub struct RedisStreamFabric {
    client: redis::Client,
    conn: ConnectionManager,
    claim_idle: Duration,
}

impl fmt::Debug for RedisStreamFabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamFabric")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStreamFabric {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        info!("Connecting to broker at {}", url);
        let client = redis::Client::open(url).map_err(|e| bus_err("invalid broker URL", e))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| bus_err("failed to connect to broker", e))?;
        Ok(Self {
            client,
            conn,
            claim_idle: CLAIM_MIN_IDLE,
        })
    }

    /// How long an entry must sit unsettled before another consumer may
    /// take it over.
    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle = idle;
        self
    }

    async fn touch(conn: &mut ConnectionManager) -> Result<(), BusError> {
        conn.set::<_, _, ()>(ACTIVITY_KEY, now_millis())
            .await
            .map_err(|e| bus_err("SET last_activity", e))
    }

    async fn ensure_group(&self, queue: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key(queue))
            .arg(GROUP)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(BusError::Subscribe(queue.to_string(), e.to_string())),
        }
    }
}

#[async_trait]
impl MessageBus for RedisStreamFabric {
    async fn declare_queue(&self, queue: &str, selectors: &[String]) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(QUEUES_KEY, queue)
            .await
            .map_err(|e| bus_err("SADD queues", e))?;
        if !selectors.is_empty() {
            conn.sadd::<_, _, ()>(bindings_key(queue), selectors)
                .await
                .map_err(|e| bus_err("SADD bindings", e))?;
        }
        self.ensure_group(queue).await?;
        debug!("Declared queue {} bound to {:?}", queue, selectors);
        Ok(())
    }

    async fn publish(&self, envelope: Envelope) -> Result<usize, BusError> {
        let mut conn = self.conn.clone();
        let queues: Vec<String> = conn
            .smembers(QUEUES_KEY)
            .await
            .map_err(|e| bus_err("SMEMBERS queues", e))?;

        let mut routed = 0;
        for queue in queues {
            let bindings: Vec<String> = conn
                .smembers(bindings_key(&queue))
                .await
                .map_err(|e| bus_err("SMEMBERS bindings", e))?;
            if !any_selector_matches(&bindings, &envelope.topic) {
                continue;
            }
            // Count before the entry becomes visible so a fast consumer can
            // never drive the counter negative.
            conn.incr::<_, _, ()>(PENDING_KEY, 1)
                .await
                .map_err(|e| bus_err("INCR pending", e))?;
            let added: redis::RedisResult<String> = redis::cmd("XADD")
                .arg(stream_key(&queue))
                .arg("*")
                .arg("topic")
                .arg(&envelope.topic)
                .arg("payload")
                .arg(envelope.payload.as_slice())
                .query_async(&mut conn)
                .await;
            if let Err(e) = added {
                let _ = conn.decr::<_, _, ()>(PENDING_KEY, 1).await;
                return Err(BusError::Publish(queue, e.to_string()));
            }
            routed += 1;
        }

        Self::touch(&mut conn).await?;
        debug!("Published {} to {} queue(s)", envelope.topic, routed);
        Ok(routed)
    }

    async fn subscribe_as(
        &self,
        queue: &str,
        consumer: &str,
        selectors: &[String],
    ) -> Result<Box<dyn Subscription>, BusError> {
        self.declare_queue(queue, selectors).await?;
        let reader = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| bus_err("failed to open consumer connection", e))?;
        Ok(Box::new(RedisSubscription {
            stream: stream_key(queue),
            consumer: consumer.to_string(),
            reader,
            conn: self.conn.clone(),
            buffer: VecDeque::new(),
            replay_pending: Arc::new(AtomicBool::new(true)),
            claim_idle: self.claim_idle,
            next_claim: Instant::now(),
        }))
    }

    async fn activity(&self) -> Result<ActivitySnapshot, BusError> {
        let mut conn = self.conn.clone();
        let pending: Option<i64> = conn
            .get(PENDING_KEY)
            .await
            .map_err(|e| bus_err("GET pending", e))?;
        let last: Option<u64> = conn
            .get(ACTIVITY_KEY)
            .await
            .map_err(|e| bus_err("GET last_activity", e))?;
        let idle_for = last
            .map(|ms| Duration::from_millis(now_millis().saturating_sub(ms)))
            .unwrap_or(Duration::MAX);
        Ok(ActivitySnapshot {
            pending: pending.unwrap_or(0).max(0) as u64,
            idle_for,
        })
    }
}

struct RedisSubscription {
    stream: String,
    consumer: String,
    reader: MultiplexedConnection,
    conn: ConnectionManager,
    buffer: VecDeque<(StreamId, bool)>,
    /// Set while this consumer's own pending entries must be read again.
    replay_pending: Arc<AtomicBool>,
    claim_idle: Duration,
    next_claim: Instant,
}

impl RedisSubscription {
    /// Takes over entries other consumers left pending for too long.
    async fn reclaim(&mut self) -> Result<usize, BusError> {
        let mut start = CLAIM_DONE.to_string();
        let mut claimed = 0;
        loop {
            let reply: StreamAutoClaimReply = self
                .conn
                .xautoclaim_options(
                    &self.stream,
                    GROUP,
                    &self.consumer,
                    self.claim_idle.as_millis() as u64,
                    &start,
                    StreamAutoClaimOptions::default().count(READ_BATCH),
                )
                .await
                .map_err(|e| BusError::Subscribe(self.stream.clone(), e.to_string()))?;

            // Trimmed entries leave the pending list without ever settling.
            if !reply.deleted_ids.is_empty() {
                self.conn
                    .decr::<_, _, ()>(PENDING_KEY, reply.deleted_ids.len())
                    .await
                    .map_err(|e| bus_err("DECR pending", e))?;
            }
            claimed += reply.claimed.len();
            for entry in reply.claimed {
                self.buffer.push_back((entry, true));
            }
            if reply.next_stream_id == CLAIM_DONE {
                break;
            }
            start = reply.next_stream_id;
        }
        self.next_claim = Instant::now() + CLAIM_EVERY;
        if claimed > 0 {
            info!(
                "Consumer {} reclaimed {} stale entries on {}",
                self.consumer, claimed, self.stream
            );
        }
        Ok(claimed)
    }

    async fn fill(&mut self) -> Result<(), BusError> {
        let replay = self.replay_pending.load(Ordering::SeqCst);
        // Own pending entries are replayed first; claiming while replaying
        // would hand the same entry out twice.
        if !replay && Instant::now() >= self.next_claim && self.reclaim().await? > 0 {
            return Ok(());
        }
        let start = if replay { "0" } else { ">" };
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(GROUP)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(READ_BATCH)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(start)
            .query_async(&mut self.reader)
            .await
            .map_err(|e| BusError::Subscribe(self.stream.clone(), e.to_string()))?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        if replay && entries.is_empty() {
            self.replay_pending.store(false, Ordering::SeqCst);
        }
        for entry in entries {
            self.buffer.push_back((entry, replay));
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn recv(&mut self) -> Result<Option<Delivery>, BusError> {
        loop {
            if let Some((entry, redelivered)) = self.buffer.pop_front() {
                let topic: Option<String> = entry.get("topic");
                let payload: Option<Vec<u8>> = entry.get("payload");
                let (Some(topic), Some(payload)) = (topic, payload) else {
                    warn!("Dropping malformed stream entry {} on {}", entry.id, self.stream);
                    let mut acker = StreamAcker::new(self, entry.id.clone());
                    acker.reject().await?;
                    continue;
                };
                let acker = StreamAcker::new(self, entry.id);
                return Ok(Some(Delivery::new(
                    Envelope { topic, payload },
                    redelivered,
                    Box::new(acker),
                )));
            }

            let was_replaying = self.replay_pending.load(Ordering::SeqCst);
            self.fill().await?;
            if self.buffer.is_empty() && !was_replaying {
                tokio::time::sleep(EMPTY_POLL).await;
            }
        }
    }
}

struct StreamAcker {
    stream: String,
    id: String,
    conn: ConnectionManager,
    replay_pending: Arc<AtomicBool>,
    settled: bool,
}

impl StreamAcker {
    fn new(subscription: &RedisSubscription, id: String) -> Self {
        Self {
            stream: subscription.stream.clone(),
            id,
            conn: subscription.conn.clone(),
            replay_pending: subscription.replay_pending.clone(),
            settled: false,
        }
    }

    async fn settle(&mut self) -> Result<(), BusError> {
        if self.settled {
            return Ok(());
        }
        let acked: i64 = self
            .conn
            .xack(&self.stream, GROUP, &[&self.id])
            .await
            .map_err(|e| BusError::Ack(e.to_string()))?;
        if acked > 0 {
            self.conn
                .decr::<_, _, ()>(PENDING_KEY, 1)
                .await
                .map_err(|e| BusError::Ack(e.to_string()))?;
        }
        RedisStreamFabric::touch(&mut self.conn).await?;
        self.settled = true;
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for StreamAcker {
    async fn ack(&mut self) -> Result<(), BusError> {
        self.settle().await
    }

    async fn reject(&mut self) -> Result<(), BusError> {
        debug!("Rejected {} on {}", self.id, self.stream);
        self.settle().await
    }
}

impl Drop for StreamAcker {
    fn drop(&mut self) {
        if !self.settled {
            // The entry is still in this consumer's pending list; read it
            // again before new entries.
            self.replay_pending.store(true, Ordering::SeqCst);
        }
    }
}
