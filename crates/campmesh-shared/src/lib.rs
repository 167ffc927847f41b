//! # campmesh-shared
//!
//! Types shared by every CampMesh crate: member and message identities, the
//! domain records, the bincode wire protocol and the persistence snapshot.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod snapshot;
pub mod types;

pub use error::{ParseRoleError, ProtocolError};
pub use models::*;
pub use protocol::{AckFrame, MessageFrame, ReadReceipt, WireMessage};
pub use snapshot::Snapshot;
pub use types::*;
