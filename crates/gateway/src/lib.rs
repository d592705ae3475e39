//! Storage gateway boundary for the transfer engine.
//!
//! A [`Gateway`] exposes one storage account (a cloud drive, a local
//! directory, ...) as a set of capability-gated async operations. The
//! [`ops`] helpers wire gateways into the retrying engine from
//! `nimbus-transfer`.

mod capability;
mod gateway;
mod id;
mod local;
mod memory;
pub mod ops;
mod registry;
mod source;
mod validation;

pub use capability::{Capabilities, Capability};
pub use gateway::{BoxedReader, BoxedWriter, Gateway, GatewayFuture};
pub use id::FileSystemId;
pub use local::LocalGateway;
pub use memory::{MemoryGateway, ReadFault};
pub use ops::{TransferOptions, download, download_to_relay, upload};
pub use registry::ConnectionRegistry;
pub use source::{GatewaySink, GatewaySourceFactory, RecreateRemote};
pub use validation::validate_relative_path;

use nimbus_transfer::TransferError;

/// Errors produced by gateways and the registry.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(FileSystemId),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{gateway} does not support {capability}")]
    Unsupported {
        gateway: String,
        capability: Capability,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("no gateway registered for account {0}")]
    UnknownAccount(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl From<GatewayError> for TransferError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Io(e) => TransferError::Io(e),
            GatewayError::NotFound(id) => TransferError::NotFound(id.to_string()),
            GatewayError::InvalidPath(msg) => TransferError::InvalidArgument(msg),
            e @ GatewayError::Unsupported { .. } => TransferError::Unsupported(e.to_string()),
            GatewayError::Auth(msg) => TransferError::Auth(msg),
            GatewayError::Connection(msg) => TransferError::Connection(msg),
            GatewayError::UnknownAccount(account) => TransferError::NotFound(account),
            GatewayError::Transfer(e) => e,
        }
    }
}
