//! Core types shared by the queue, the typed-data store and the signers

pub mod account;
pub mod errors;
pub mod payload;
pub mod status;

pub use account::{Account, KeyringClass, SignerKind};
pub use errors::{FailureKind, Localizer, PayloadError, QueueError, SignError, TaskError, HARDWARE_USER_CANCELLED};
pub use payload::{Payload, Quantity, TransactionPayload, TypedDataPayload, TypedDataVersion};
pub use status::{ItemStatus, Session, SessionStatus, SignTarget, WorkItem};
