//! Pub/sub sink backed by Redis. `publish` issues a `PUBLISH` to the
//! `critical` or `logging` channel with the message's raw bytes as payload.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::warn;

use syslogd_core::sinks::{PubSubSink, Topic};

pub struct RedisSink {
    conn: ConnectionManager,
}

impl RedisSink {
    pub async fn connect(redis_url: &str) -> Result<RedisSink, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisSink { conn })
    }
}

#[async_trait]
impl PubSubSink for RedisSink {
    async fn publish(&self, topic: Topic, raw: &[u8]) {
        let mut conn = self.conn.clone();
        let result: Result<i64, redis::RedisError> =
            redis::cmd("PUBLISH").arg(topic.as_str()).arg(raw).query_async(&mut conn).await;
        if let Err(e) = result {
            warn!(error = %e, topic = topic.as_str(), "redis publish failed");
        }
    }
}
