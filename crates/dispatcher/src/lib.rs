//! # Dispatcher
//!
//! Replication rounds over a group transport.
//!
//! Responsible for:
//! - Sending one command to many members (broadcast or per-target unicast)
//! - Collecting answers per delivery mode, with deadlines
//! - Replaying to members that ignored a round
//! - Executing inbound commands and answering the origin

pub mod codec;
pub mod collator;
pub mod engine;
pub mod error;
pub mod inbound;
pub mod metrics;
pub mod queue;
pub mod replay;
mod replies;
pub mod round;

pub use codec::{BincodeMarshaller, JsonMarshaller, WireMarshaller};
pub use collator::FutureCollator;
pub use contracts::{DeliveryMode, Response, ResponseSet, RoutingMode};
pub use engine::DispatchEngine;
pub use error::RpcError;
pub use inbound::InboundHandler;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use queue::ReplicationQueue;
pub use replay::ReplayCoordinator;
pub use round::ReplicationRound;
