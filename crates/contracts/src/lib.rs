//! # Contracts
//!
//! Frozen interface contracts, defining the data model of a replication round
//! and the collaborator traits around it.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Collaborators
//! - [`Transport`]: membership and message delivery
//! - [`Marshaller`]: command/response encoding
//! - [`CommandExecutor`]: execution of inbound commands

mod command;
mod dispatch_config;
mod error;
mod filter;
mod marshaller;
mod mode;
mod node_address;
mod response;
mod transport;

pub use command::*;
pub use dispatch_config::*;
pub use error::*;
pub use filter::*;
pub use marshaller::Marshaller;
pub use mode::*;
pub use node_address::NodeAddress;
pub use response::*;
pub use transport::*;

pub use validator::Validate;
