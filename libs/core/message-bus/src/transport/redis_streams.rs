//! Redis Streams transport
//!
//! Every destination is a stream. Topic subscriptions are consumer groups
//! named after the subscription; queue consumers share one group per queue.
//! An inbox first drains the entries still pending for its own consumer name,
//! then reads new ones. Entries another consumer left pending past the claim
//! idle time are claimed with XCLAIM.

use super::{
    Acknowledger, DeliverySource, Destination, InboundMessage, Inbox, SubscriptionSpec, Transport,
};
use crate::config::BusOptions;
use crate::envelope::RawEnvelope;
use crate::error::BusError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type StreamEntry = (String, Vec<(String, String)>);
// Type alias for XREADGROUP replies
type StreamReply = Vec<(String, Vec<StreamEntry>)>;
// XPENDING extended form: id, consumer, idle ms, delivery count
type PendingEntry = (String, String, u64, u64);

const ENVELOPE_FIELD: &str = "envelope";
const TYPE_FIELD: &str = "message_type";
// Set on redeliveries aimed at a single consumer group
const TARGET_FIELD: &str = "target";

fn queue_group(queue: &str) -> String {
    format!("{queue}:consumers")
}

/// Redis Streams transport
pub struct RedisStreamsTransport {
    client: Client,
    redis: ConnectionManager,
    max_length: usize,
    block_timeout_ms: u64,
    batch_size: usize,
    consumer_id: String,
    claim_idle_ms: u64,
}

impl RedisStreamsTransport {
    pub async fn connect(url: &str, options: &BusOptions) -> Result<Self, BusError> {
        info!("Connecting to Redis...");
        let client = Client::open(url)?;
        let redis = ConnectionManager::new(client.clone()).await?;
        info!("Connected to Redis successfully");

        Ok(Self {
            client,
            redis,
            max_length: options.stream_max_length,
            block_timeout_ms: options.block_timeout_ms,
            batch_size: options.max_concurrent_calls.max(1),
            consumer_id: options.consumer_id.clone(),
            claim_idle_ms: options.claim_idle_ms,
        })
    }

    async fn xadd(
        &self,
        stream: &str,
        envelope: &RawEnvelope,
        target: Option<&str>,
    ) -> Result<String, BusError> {
        let mut conn = self.redis.clone();
        let data = envelope.encode_string()?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(ENVELOPE_FIELD)
            .arg(&data)
            .arg(TYPE_FIELD)
            .arg(envelope.message_type());
        if let Some(target) = target {
            cmd.arg(TARGET_FIELD).arg(target);
        }

        let stream_id: String = cmd.query_async(&mut conn).await?;
        debug!(stream = %stream, stream_id = %stream_id, "Appended message");
        Ok(stream_id)
    }
}

#[async_trait]
impl Transport for RedisStreamsTransport {
    fn name(&self) -> &'static str {
        "redis-streams"
    }

    async fn deliver(
        &self,
        destination: &Destination,
        envelope: &RawEnvelope,
    ) -> Result<(), BusError> {
        self.xadd(destination.name(), envelope, None).await?;
        Ok(())
    }

    async fn redeliver(
        &self,
        source: &DeliverySource,
        envelope: &RawEnvelope,
    ) -> Result<(), BusError> {
        let target = match &source.destination {
            Destination::Topic(_) => source.subscription.as_deref(),
            Destination::Queue(_) => None,
        };
        self.xadd(source.destination.name(), envelope, target).await?;
        Ok(())
    }

    async fn open_inbox(&self, spec: &SubscriptionSpec) -> Result<Box<dyn Inbox>, BusError> {
        let (group, start) = match (&spec.source.destination, &spec.source.subscription) {
            // New subscriptions see messages published from now on
            (Destination::Topic(_), Some(subscription)) => (subscription.clone(), "$"),
            (Destination::Topic(topic), None) => {
                return Err(BusError::Config(core_config::ConfigError::Invalid(format!(
                    "subscription to stream '{topic}' needs a name"
                ))));
            }
            (Destination::Queue(queue), _) => (queue_group(queue), "0"),
        };

        // Dedicated connection so blocking reads do not stall publishers
        let redis = ConnectionManager::new(self.client.clone()).await?;
        let inbox = RedisInbox {
            redis,
            stream: spec.source.destination.name().to_string(),
            group,
            start,
            consumer: self.consumer_id.clone(),
            block_timeout_ms: self.block_timeout_ms,
            batch_size: self.batch_size,
            claim_idle_ms: self.claim_idle_ms,
            buffer: VecDeque::new(),
            pending_cursor: Some("0".to_string()),
            last_claim: None,
        };
        inbox.init_consumer_group().await?;
        Ok(Box::new(inbox))
    }
}

struct RedisInbox {
    redis: ConnectionManager,
    stream: String,
    group: String,
    start: &'static str,
    consumer: String,
    block_timeout_ms: u64,
    batch_size: usize,
    claim_idle_ms: u64,
    buffer: VecDeque<InboundMessage>,
    /// Last id read from this consumer's own pending entries, `None` once drained
    pending_cursor: Option<String>,
    last_claim: Option<Instant>,
}

impl RedisInbox {
    /// Create the consumer group if it doesn't exist
    async fn init_consumer_group(&self) -> Result<(), BusError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(self.start)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!(stream = %self.stream, group = %self.group, "Created consumer group");
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn claim_due(&self) -> bool {
        let interval = Duration::from_millis(self.claim_idle_ms.saturating_mul(2));
        self.pending_cursor.is_none()
            && self.last_claim.is_none_or(|at| at.elapsed() >= interval)
    }

    /// Claim entries other consumers of the group left pending
    async fn claim_abandoned(&mut self) -> Result<usize, BusError> {
        let mut conn = self.redis.clone();

        let pending: RedisResult<Vec<PendingEntry>> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.claim_idle_ms)
            .arg("-")
            .arg("+")
            .arg(self.batch_size)
            .query_async(&mut conn)
            .await;

        let pending = match pending {
            Ok(p) => p,
            Err(e) if e.to_string().contains("NOGROUP") => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        // Entries under our own name are in flight in this process
        let claim_ids: Vec<&str> = pending
            .iter()
            .filter(|(_, consumer, _, _)| *consumer != self.consumer)
            .map(|(id, _, _, _)| id.as_str())
            .collect();

        if claim_ids.is_empty() {
            return Ok(0);
        }

        // XCLAIM re-checks the idle time, so concurrent claimers get disjoint entries
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.claim_idle_ms)
            .arg(&claim_ids);

        let entries: Vec<StreamEntry> = cmd.query_async(&mut conn).await?;
        let claimed = entries.len();
        if claimed > 0 {
            warn!(
                stream = %self.stream,
                group = %self.group,
                count = claimed,
                "Claimed abandoned messages"
            );
        }
        for (stream_id, fields) in entries {
            self.accept(stream_id, fields).await?;
        }
        Ok(claimed)
    }

    async fn read(&mut self) -> Result<(), BusError> {
        if self.claim_due() {
            self.last_claim = Some(Instant::now());
            match self.claim_abandoned().await {
                Ok(0) => {}
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        stream = %self.stream,
                        group = %self.group,
                        error = %e,
                        "Failed to claim abandoned messages"
                    );
                }
            }
        }

        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(&self.group).arg(&self.consumer);
        if self.pending_cursor.is_none() {
            cmd.arg("BLOCK").arg(self.block_timeout_ms);
        }
        cmd.arg("COUNT")
            .arg(self.batch_size)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(self.pending_cursor.as_deref().unwrap_or(">"));

        let result: RedisResult<Option<StreamReply>> = cmd.query_async(&mut conn).await;
        let streams = match result {
            Ok(Some(streams)) => streams,
            Ok(None) => Vec::new(), // BLOCK timeout, no messages
            Err(e) if e.to_string().contains("NOGROUP") => {
                warn!(
                    stream = %self.stream,
                    group = %self.group,
                    "Consumer group missing, recreating..."
                );
                self.init_consumer_group().await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<StreamEntry> = streams
            .into_iter()
            .flat_map(|(_stream, entries)| entries)
            .collect();

        if self.pending_cursor.is_some() {
            // Pending reads return ids after the cursor, so advance past this batch
            match entries.last() {
                Some((last_id, _)) => self.pending_cursor = Some(last_id.clone()),
                None => {
                    debug!(stream = %self.stream, group = %self.group, "Pending entries drained");
                    self.pending_cursor = None;
                }
            }
        }

        for (stream_id, fields) in entries {
            self.accept(stream_id, fields).await?;
        }
        Ok(())
    }

    async fn accept(
        &mut self,
        stream_id: String,
        fields: Vec<(String, String)>,
    ) -> Result<(), BusError> {
        let acker = RedisAcker {
            redis: self.redis.clone(),
            stream: self.stream.clone(),
            group: self.group.clone(),
            stream_id,
            fields,
        };

        // Redelivery aimed at another subscription
        if acker
            .field(TARGET_FIELD)
            .is_some_and(|target| target != self.group)
        {
            acker.ack().await?;
            return Ok(());
        }

        let envelope = match acker.field(ENVELOPE_FIELD) {
            Some(data) => RawEnvelope::decode(data.as_bytes()),
            None => {
                warn!(
                    stream_id = %acker.stream_id,
                    fields = ?acker.fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                    "Missing 'envelope' field in message"
                );
                RawEnvelope::quarantined(String::new(), "missing 'envelope' field")
            }
        };

        self.buffer.push_back(InboundMessage {
            envelope,
            acker: Box::new(acker),
        });
        Ok(())
    }
}

#[async_trait]
impl Inbox for RedisInbox {
    async fn next(&mut self) -> Result<Option<InboundMessage>, BusError> {
        loop {
            if let Some(message) = self.buffer.pop_front() {
                return Ok(Some(message));
            }
            self.read().await?;
        }
    }
}

struct RedisAcker {
    redis: ConnectionManager,
    stream: String,
    group: String,
    stream_id: String,
    fields: Vec<(String, String)>,
}

impl RedisAcker {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
impl Acknowledger for RedisAcker {
    async fn ack(&self) -> Result<(), BusError> {
        let mut conn = self.redis.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.stream_id)
            .query_async(&mut conn)
            .await?;
        debug!(stream_id = %self.stream_id, "Acknowledged message");
        Ok(())
    }

    /// Re-append the entry for this group, then acknowledge the original
    async fn requeue(&self) -> Result<(), BusError> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream).arg("*");
        for (key, value) in &self.fields {
            if key != TARGET_FIELD {
                cmd.arg(key).arg(value);
            }
        }
        cmd.arg(TARGET_FIELD).arg(&self.group);
        let _: String = cmd.query_async(&mut conn).await?;

        self.ack().await
    }
}
