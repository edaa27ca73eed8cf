//! `OCP-Session` header codec and companion OCP headers.
//!
//! Wire format: JSON, gzip-compressed when the JSON exceeds [`COMPRESSION_THRESHOLD`] bytes and
//! compression actually helps, then standard padded Base64. The encoded value must not exceed
//! [`MAX_HEADER_BYTES`].

use crate::context::Context;
use crate::error::{ContextError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::io::{Read, Write};

pub const OCP_SESSION: HeaderName = HeaderName::from_static("ocp-session");
pub const OCP_CONTEXT_ID: HeaderName = HeaderName::from_static("ocp-context-id");
pub const OCP_AGENT_TYPE: HeaderName = HeaderName::from_static("ocp-agent-type");
pub const OCP_USER: HeaderName = HeaderName::from_static("ocp-user");
pub const OCP_WORKSPACE: HeaderName = HeaderName::from_static("ocp-workspace");
pub const OCP_CURRENT_GOAL: HeaderName = HeaderName::from_static("ocp-current-goal");
pub const OCP_VERSION: HeaderName = HeaderName::from_static("ocp-version");

/// Protocol version advertised in `OCP-Version`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Upper bound for the encoded `OCP-Session` value.
pub const MAX_HEADER_BYTES: usize = 8192;

/// JSON payloads larger than this are candidates for gzip.
pub const COMPRESSION_THRESHOLD: usize = 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LEGACY_GZIP_PREFIX: &str = "gzip:";
// Inflated payloads are capped so a tiny header cannot expand without bound.
const MAX_DECOMPRESSED_BYTES: u64 = 1024 * 1024;

const ALL_OCP_HEADERS: [HeaderName; 7] = [
    OCP_SESSION,
    OCP_CONTEXT_ID,
    OCP_AGENT_TYPE,
    OCP_USER,
    OCP_WORKSPACE,
    OCP_CURRENT_GOAL,
    OCP_VERSION,
];

/// Result of [`encode_fitting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedContext {
    /// The `OCP-Session` header value.
    pub value: String,
    /// Number of oldest history entries dropped to fit the budget.
    pub dropped_history: usize,
    /// Whether gzip was applied.
    pub compressed: bool,
}

/// Encode a context into an `OCP-Session` header value.
///
/// # Errors
///
/// Returns [`ContextError::ContextTooLarge`] if the encoded value exceeds [`MAX_HEADER_BYTES`].
pub fn encode(context: &Context) -> Result<String> {
    encode_inner(context).map(|(value, _)| value)
}

/// Encode a context, dropping its oldest history entries until the value fits.
///
/// Pruning happens on a copy; `context` itself is left as is. Identity fields are never touched.
///
/// # Errors
///
/// Returns [`ContextError::ContextTooLarge`] if the value still does not fit once history is
/// exhausted.
pub fn encode_fitting(context: &Context) -> Result<EncodedContext> {
    match encode_inner(context) {
        Ok((value, compressed)) => {
            return Ok(EncodedContext {
                value,
                dropped_history: 0,
                compressed,
            });
        }
        Err(ContextError::ContextTooLarge { .. }) => {}
        Err(e) => return Err(e),
    }

    let mut pruned = context.clone();
    let mut dropped = 0usize;
    loop {
        if !pruned.drop_oldest_interaction() {
            // History exhausted: report the size of the minimal form.
            let (size, _) = encoded_size(&pruned)?;
            return Err(ContextError::ContextTooLarge {
                size,
                limit: MAX_HEADER_BYTES,
            });
        }
        dropped += 1;
        match encode_inner(&pruned) {
            Ok((value, compressed)) => {
                tracing::debug!(
                    context_id = %context.context_id(),
                    dropped,
                    "Pruned history to fit OCP-Session header"
                );
                return Ok(EncodedContext {
                    value,
                    dropped_history: dropped,
                    compressed,
                });
            }
            Err(ContextError::ContextTooLarge { .. }) => {}
            Err(e) => return Err(e),
        }
    }
}

fn encode_inner(context: &Context) -> Result<(String, bool)> {
    let (encoded, compressed) = encode_unbounded(context)?;
    if encoded.len() > MAX_HEADER_BYTES {
        return Err(ContextError::ContextTooLarge {
            size: encoded.len(),
            limit: MAX_HEADER_BYTES,
        });
    }
    Ok((encoded, compressed))
}

fn encoded_size(context: &Context) -> Result<(usize, bool)> {
    encode_unbounded(context).map(|(s, c)| (s.len(), c))
}

fn encode_unbounded(context: &Context) -> Result<(String, bool)> {
    let json = serde_json::to_vec(context)?;
    let (bytes, compressed) = if json.len() > COMPRESSION_THRESHOLD {
        let gz = gzip(&json)?;
        if gz.len() < json.len() {
            (gz, true)
        } else {
            (json, false)
        }
    } else {
        (json, false)
    };
    Ok((STANDARD.encode(bytes), compressed))
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Decode an `OCP-Session` header value.
///
/// Never fails: malformed input yields `None` so the surrounding request proceeds without
/// context.
#[must_use]
pub fn decode(value: &str) -> Option<Context> {
    match try_decode(value) {
        Ok(ctx) => Some(ctx),
        Err(reason) => {
            tracing::debug!(reason = %reason, "Ignoring undecodable OCP-Session header");
            None
        }
    }
}

fn try_decode(value: &str) -> std::result::Result<Context, String> {
    let trimmed = value.trim();
    let b64 = trimmed.strip_prefix(LEGACY_GZIP_PREFIX).unwrap_or(trimmed);
    let raw = STANDARD
        .decode(b64)
        .map_err(|e| format!("invalid base64: {e}"))?;

    let json = if raw.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(raw.as_slice())
            .take(MAX_DECOMPRESSED_BYTES)
            .read_to_end(&mut out)
            .map_err(|e| format!("invalid gzip payload: {e}"))?;
        out
    } else {
        raw
    };

    let doc: serde_json::Value =
        serde_json::from_slice(&json).map_err(|e| format!("invalid JSON: {e}"))?;
    Context::from_value(doc).map_err(|e| e.to_string())
}

/// Build the full OCP header set for an outgoing request.
///
/// Companion values that are not valid header values are skipped; the session blob still
/// carries them.
///
/// # Errors
///
/// Returns [`ContextError::ContextTooLarge`] if the context cannot fit even after pruning.
pub fn context_headers(context: &Context) -> Result<HeaderMap> {
    let encoded = encode_fitting(context)?;
    let mut headers = HeaderMap::new();

    // Base64 output is always a valid header value.
    if let Ok(v) = HeaderValue::from_str(&encoded.value) {
        headers.insert(OCP_SESSION, v);
    }
    insert_companion(&mut headers, OCP_CONTEXT_ID, Some(context.context_id()));
    insert_companion(&mut headers, OCP_AGENT_TYPE, Some(context.agent_type()));
    insert_companion(&mut headers, OCP_USER, context.user());
    insert_companion(&mut headers, OCP_WORKSPACE, context.workspace());
    insert_companion(&mut headers, OCP_CURRENT_GOAL, context.current_goal());
    headers.insert(OCP_VERSION, HeaderValue::from_static(PROTOCOL_VERSION));
    Ok(headers)
}

fn insert_companion(headers: &mut HeaderMap, name: HeaderName, value: Option<&str>) {
    let Some(value) = value else {
        return;
    };
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => {
            tracing::debug!(header = %name, "Skipping companion header with non-visible characters");
        }
    }
}

/// Extract a context from request or response headers.
#[must_use]
pub fn parse_context(headers: &HeaderMap) -> Option<Context> {
    let value = headers.get(OCP_SESSION)?.to_str().ok()?;
    decode(value)
}

/// Remove every OCP header.
pub fn strip_ocp_headers(headers: &mut HeaderMap) {
    for name in ALL_OCP_HEADERS {
        headers.remove(name);
    }
}

/// One-line summary of the OCP headers present, for debug logs.
#[must_use]
pub fn context_summary_line(headers: &HeaderMap) -> String {
    match parse_context(headers) {
        Some(ctx) => {
            let mut line = format!(
                "OCP context {} (agent: {}, interactions: {})",
                ctx.context_id(),
                ctx.agent_type(),
                ctx.session().interaction_count
            );
            if let Some(goal) = ctx.current_goal() {
                line.push_str(&format!(", goal: {goal}"));
            }
            line
        }
        None => "No OCP context".to_string(),
    }
}
