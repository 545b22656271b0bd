//! # callguard-core
//!
//! Core types shared by the callguard crates:
//!
//! - **Errors**: [`CallGuardError`] and its storage/transport sources
//! - **Call identity**: [`CallRequest`] and its deterministic cache key
//! - **Clock**: wall-clock abstraction used for expirations and windows
//! - **Transport**: the single-exchange [`Transport`] trait and an HTTP implementation
//! - **Codec**: optional payload interpretation
//!
//! ## Feature Flags
//!
//! - `http` (default): enable [`HttpTransport`] backed by `reqwest`

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod clock;
pub mod codec;
pub mod error;
pub mod payload;
pub mod request;
pub mod transport;

// Re-exports for convenience
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use codec::{JsonCodec, PayloadCodec, PayloadFormat};
pub use error::{CallGuardError, Result, StorageError, TransportError};
pub use payload::Payload;
pub use request::{hash_key, CallRequest, Method};
pub use transport::{BoxedTransport, Transport};

#[cfg(feature = "http")]
pub use transport::{HttpTransport, HttpTransportBuilder};
