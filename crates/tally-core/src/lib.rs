//! tally-core: shared building blocks for the tally metrics pipeline.
//!
//! Holds the metric data model, the batch codec used on the wire and in
//! snapshot files, the HMAC signer, and configuration types for both the
//! agent and the server.

pub mod codec;
pub mod config;
pub mod sign;
pub mod types;

pub use codec::{CodecError, CodecResult};
pub use config::{AgentConfig, AgentSettings, ServerConfig, ServerSettings};
pub use sign::{SIGNATURE_HEADER, Signer};
pub use types::*;
