//! Fail-safe client side connection management.
//!
//! A [`ConnectionsHandler`] drives a connection through `Undef -> Alive <-> Polling -> Dead`,
//! queues publishes and subscribes while the server is unreachable and flushes them once
//! the connection is re-established.

use std::fmt;

use async_trait::async_trait;

use crate::error::{Result, XmlBlasterError};
use crate::queue::QueueEntry;
use crate::types::MsgUnitRaw;

mod handler;

pub use self::handler::ConnectionsHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected yet
    Undef,
    Alive,
    /// Lost, reconnect attempts are running
    Polling,
    /// Given up, terminal
    Dead,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Undef => "UNDEF",
            ConnectionState::Alive => "ALIVE",
            ConnectionState::Polling => "POLLING",
            ConnectionState::Dead => "DEAD",
        }
    }
}

impl fmt::Display for ConnectionState {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which server answered a (re)connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerInstance {
    /// The first successful connect
    Initial,
    /// The server kept our session, queued subscriptions are still active
    Same,
    /// The server restarted or failed over, subscriptions must be reissued
    New,
}

/// The protocol driver, consumes serialized QoS and hands back the raw return QoS.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, qos: &str) -> Result<String>;

    async fn disconnect(&self, qos: &str) -> Result<()>;

    async fn publish(&self, msg: &MsgUnitRaw) -> Result<String>;

    async fn publish_arr(&self, msgs: &[MsgUnitRaw]) -> Result<Vec<String>> {
        let mut rets = Vec::with_capacity(msgs.len());
        for msg in msgs {
            rets.push(self.publish(msg).await?);
        }
        Ok(rets)
    }

    async fn subscribe(&self, key: &str, qos: &str) -> Result<String>;

    async fn unsubscribe(&self, key: &str, qos: &str) -> Result<Vec<String>>;

    async fn get(&self, key: &str, qos: &str) -> Result<Vec<MsgUnitRaw>>;

    async fn erase(&self, key: &str, qos: &str) -> Result<Vec<String>>;

    async fn ping(&self, qos: &str) -> Result<String>;

    /// Releases the resources, called once after disconnect
    async fn shutdown(&self) -> Result<()>;
}

/// Connection state notifications, called on the dispatcher side and must not block.
pub trait Listener: Send + Sync + 'static {
    fn reached_alive(&self, _old: ConnectionState, _server: ServerInstance) {}

    fn reached_polling(&self, _old: ConnectionState) {}

    fn reached_dead(&self, _old: ConnectionState, _reason: &XmlBlasterError) {}

    /// An entry diverted by the overflow policy or left over when the connection died
    fn dead_message(&self, entry: &QueueEntry, reason: &XmlBlasterError) {
        log::warn!("dead message {:?} {}, {}", entry.invocation.method(), entry.id, reason);
    }
}

/// Ignores the transitions, logs dead messages.
pub struct DefaultListener;

impl Listener for DefaultListener {}
