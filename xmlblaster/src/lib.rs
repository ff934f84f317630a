#![deny(unsafe_code)]

//! # Overall Example
//! ```rust,no_run
//!
//! use std::sync::Arc;
//!
//! use xmlblaster::dispatch::{ConnectionsHandler, DefaultListener, Transport};
//! use xmlblaster::qos::{ConnectQosData, MsgQosData};
//! use xmlblaster::types::MsgUnit;
//! use xmlblaster::Result;
//!
//! async fn run(transport: Arc<dyn Transport>) -> Result<()> {
//!     let mut qos = ConnectQosData::with_login("joe/1", "secret")?;
//!     qos.address_mut().set_delay(4000);
//!     qos.address_mut().set_retries(-1);
//!
//!     let handler = ConnectionsHandler::new(&qos, transport, Arc::new(DefaultListener));
//!     handler.connect(qos).await?;
//!     handler.publish(MsgUnit::new("<key oid='Hello'/>", "hi", MsgQosData::new())).await?;
//!     Ok(())
//! }
//! ```

/// QoS data model
pub mod address; // Client and callback endpoint configuration
pub mod destination; // PtP destinations
pub mod prop; // Values with origin tracking
pub mod qos; // QoS documents of all invocations
pub mod queue_property; // Queue limits and overflow policies
pub mod route; // Cluster routing hops
pub mod topic; // Topic lifecycle properties
pub mod types; // Message units, priorities, session names
pub mod xml; // XML reading and writing helpers

/// Client runtime
pub mod dispatch; // Fail-safe connection handling
pub mod queue; // Client side outbox

pub mod error;
pub mod logger;

pub use error::{Error, Result, XmlBlasterError};
pub use xmlblaster_conf as conf;
pub use xmlblaster_utils as utils;
