//! dm-protocol: Wire format for the device management session
//!
//! The management session exchanges two kinds of payloads:
//!
//! - **Template records**: numeric-prefixed, comma-separated text lines
//!   (`503,c8y_Command,"hi\n"`) published upstream on `s/us` and received on
//!   the bootstrap and static downstream topics.
//! - **Operations**: JSON documents describing remote work, delivered on the
//!   device-control notification topics.

pub mod error;
pub mod escape;
pub mod operation;
pub mod record;
pub mod serde_utils;
pub mod template;
pub mod topic;

pub use error::ProtocolError;
pub use escape::{escape, unescape};
pub use operation::{ExternalSource, Operation};
pub use record::Record;
pub use template::{OperationStatus, Template};
