//! Agent context for the Open Context Protocol.
//!
//! [`Context`] is the state an agent carries across API calls. [`headers`] turns it into the
//! `OCP-Session` header (plus plain-text companion headers) and back.

pub mod context;
pub mod error;
pub mod headers;

pub use context::{Context, DEFAULT_HISTORY_LIMIT, Interaction, SessionInfo, validate_context_id};
pub use error::{ContextError, Result};
pub use headers::{
    EncodedContext, MAX_HEADER_BYTES, context_headers, decode, encode, encode_fitting,
    parse_context, strip_ocp_headers,
};
