//! Redis pub/sub broker link (optional).
//!
//! Note: Redis pub/sub is not durable; subscribers that are offline miss
//! messages. That matches the producer-side at-most-once contract here. A
//! durable broker would slot in behind the same [`BrokerLink`] trait.

use std::time::Duration;

use redis::Commands;

use equiptrack_events::EventMessage;

use super::{BrokerLink, LinkError};

/// Publishes each fact to the Redis channel named after its topic.
#[derive(Debug)]
pub struct RedisBrokerLink {
    client: redis::Client,
    connection: Option<redis::Connection>,
}

impl RedisBrokerLink {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, LinkError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| LinkError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            connection: None,
        })
    }
}

impl BrokerLink for RedisBrokerLink {
    fn connect(&mut self, deadline: Duration) -> Result<(), LinkError> {
        let connection = self
            .client
            .get_connection_with_timeout(deadline)
            .map_err(|e| LinkError::Unavailable(e.to_string()))?;
        self.connection = Some(connection);
        Ok(())
    }

    fn send(&mut self, message: &EventMessage, deadline: Duration) -> Result<(), LinkError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(LinkError::Unavailable("not connected".to_string()));
        };

        connection
            .set_write_timeout(Some(deadline))
            .map_err(|e| LinkError::Unavailable(e.to_string()))?;

        let payload = serde_json::to_string(message)
            .map_err(|e| LinkError::Unavailable(format!("encode: {e}")))?;

        let result: Result<i64, redis::RedisError> = connection.publish(&message.topic, payload);
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                // Force a fresh connection on the next attempt.
                self.connection = None;
                Err(LinkError::Unavailable(e.to_string()))
            }
        }
    }
}
