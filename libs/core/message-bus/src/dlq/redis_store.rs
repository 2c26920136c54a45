//! Redis Streams dead letter store
//!
//! Layout per dead letter queue `q`:
//! - `q:dlq` stream, one entry per record with `data` and `message_id` fields
//! - `q:dlq:ids` hash, message id -> stream entry id
//! - `dlq:index` set of every queue that has ever dead-lettered
//!
//! Appending and taking run as Lua scripts so the stream and the id hash
//! never disagree. Appends trim the stream to its maximum length and drop the
//! hash fields of trimmed entries.

use super::FailedMessageInfo;
use super::store::DeadLetterStore;
use crate::error::BusError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::AsyncCommands;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};
use uuid::Uuid;

// KEYS: stream, ids, index. ARGV: message id, data, max length, queue
static APPEND_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local previous = redis.call('HGET', KEYS[2], ARGV[1])
        local id = redis.call('XADD', KEYS[1], '*', 'data', ARGV[2], 'message_id', ARGV[1])
        redis.call('HSET', KEYS[2], ARGV[1], id)
        redis.call('SADD', KEYS[3], ARGV[4])
        if previous then
            redis.call('XDEL', KEYS[1], previous)
        end
        local overflow = redis.call('XLEN', KEYS[1]) - tonumber(ARGV[3])
        if overflow > 0 then
            local trimmed = redis.call('XRANGE', KEYS[1], '-', '+', 'COUNT', overflow)
            for _, entry in ipairs(trimmed) do
                redis.call('XDEL', KEYS[1], entry[1])
                local fields = entry[2]
                for i = 1, #fields, 2 do
                    if fields[i] == 'message_id' then
                        redis.call('HDEL', KEYS[2], fields[i + 1])
                    end
                end
            end
        end
        return id
        ",
    )
});

// KEYS: stream, ids. ARGV: message id. Returns the record data or nil
static TAKE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local id = redis.call('HGET', KEYS[2], ARGV[1])
        if not id then
            return false
        end
        redis.call('HDEL', KEYS[2], ARGV[1])
        local entries = redis.call('XRANGE', KEYS[1], id, id)
        redis.call('XDEL', KEYS[1], id)
        if #entries == 0 then
            return false
        end
        local fields = entries[1][2]
        for i = 1, #fields, 2 do
            if fields[i] == 'data' then
                return fields[i + 1]
            end
        end
        return false
        ",
    )
});

// Type alias for Redis stream entries
type StreamEntries = Vec<(String, Vec<(String, String)>)>;

const INDEX_KEY: &str = "dlq:index";

fn stream_key(queue: &str) -> String {
    format!("{queue}:dlq")
}

fn ids_key(queue: &str) -> String {
    format!("{queue}:dlq:ids")
}

fn parse_entries(entries: StreamEntries) -> Vec<FailedMessageInfo> {
    let mut results = Vec::new();
    for (id, fields) in entries {
        let Some(data) = fields.iter().find(|(k, _)| k == "data").map(|(_, v)| v) else {
            continue;
        };
        match serde_json::from_str::<FailedMessageInfo>(data) {
            Ok(info) => results.push(info),
            Err(e) => warn!(dlq_id = %id, error = %e, "Unreadable DLQ entry, skipping"),
        }
    }
    results
}

/// Durable dead letter store backed by Redis Streams
#[derive(Clone)]
pub struct RedisDeadLetterStore {
    redis: ConnectionManager,
    max_length: usize,
}

impl RedisDeadLetterStore {
    pub fn new(redis: ConnectionManager, max_length: usize) -> Self {
        Self {
            redis,
            max_length: max_length.max(1),
        }
    }

    pub async fn connect(url: &str, max_length: usize) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self::new(redis, max_length))
    }

    fn operational(context: &str, err: redis::RedisError) -> BusError {
        BusError::Operational(format!("{context}: {err}"))
    }
}

#[async_trait]
impl DeadLetterStore for RedisDeadLetterStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn append(&self, info: &FailedMessageInfo) -> Result<(), BusError> {
        let mut conn = self.redis.clone();
        let message_id = info.message_id.to_string();
        let data = serde_json::to_string(info)?;

        let dlq_id: String = APPEND_SCRIPT
            .key(stream_key(&info.queue))
            .key(ids_key(&info.queue))
            .key(INDEX_KEY)
            .arg(&message_id)
            .arg(&data)
            .arg(self.max_length)
            .arg(&info.queue)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::operational("DLQ append failed", e))?;

        debug!(queue = %info.queue, dlq_id = %dlq_id, message_id = %message_id, "Stored DLQ entry");
        Ok(())
    }

    async fn list(
        &self,
        queue: &str,
        max_count: usize,
    ) -> Result<Vec<FailedMessageInfo>, BusError> {
        let mut conn = self.redis.clone();

        let entries: StreamEntries = redis::cmd("XRANGE")
            .arg(stream_key(queue))
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(max_count)
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::operational("DLQ list failed", e))?;

        Ok(parse_entries(entries))
    }

    async fn take(
        &self,
        queue: &str,
        message_id: Uuid,
    ) -> Result<Option<FailedMessageInfo>, BusError> {
        let mut conn = self.redis.clone();

        let data: Option<String> = TAKE_SCRIPT
            .key(stream_key(queue))
            .key(ids_key(queue))
            .arg(message_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::operational("DLQ take failed", e))?;

        let Some(data) = data else {
            return Ok(None);
        };
        match serde_json::from_str::<FailedMessageInfo>(&data) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                warn!(
                    queue = %queue,
                    message_id = %message_id,
                    error = %e,
                    "Unreadable DLQ entry dropped"
                );
                Ok(None)
            }
        }
    }

    async fn all(&self) -> Result<Vec<FailedMessageInfo>, BusError> {
        let mut conn = self.redis.clone();
        let queues: Vec<String> = conn
            .smembers(INDEX_KEY)
            .await
            .map_err(|e| Self::operational("DLQ index read failed", e))?;

        let mut results = Vec::new();
        for queue in queues {
            let entries: StreamEntries = redis::cmd("XRANGE")
                .arg(stream_key(&queue))
                .arg("-")
                .arg("+")
                .query_async(&mut conn)
                .await
                .map_err(|e| Self::operational("DLQ read failed", e))?;
            results.extend(parse_entries(entries));
        }
        Ok(results)
    }
}
