//! Per-API authentication settings.

use crate::error::{HttpToolsError, Result};
use base64::Engine as _;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Static credentials attached to every request for one API.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// Arbitrary header, e.g. `X-API-Key`.
    Header { name: String, value: String },
    /// `Authorization: Basic base64(user:pass)`.
    Basic { username: String, password: String },
    /// Query pair appended to the URL (wins over a same-named query argument).
    Query { name: String, value: String },
    #[default]
    None,
}

impl AuthConfig {
    /// Headers contributed by this config. Query auth contributes none.
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::Config`] if a header name or value is not valid HTTP.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        match self {
            AuthConfig::Bearer { token } => {
                headers.insert(AUTHORIZATION, sensitive_value(&format!("Bearer {token}"))?);
            }
            AuthConfig::Header { name, value } => {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    HttpToolsError::Config(format!("Invalid auth header name '{name}': {e}"))
                })?;
                headers.insert(name, sensitive_value(value)?);
            }
            AuthConfig::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                headers.insert(AUTHORIZATION, sensitive_value(&format!("Basic {encoded}"))?);
            }
            AuthConfig::Query { .. } | AuthConfig::None => {}
        }
        Ok(headers)
    }

    /// The `(name, value)` query pair for query auth.
    #[must_use]
    pub fn query_pair(&self) -> Option<(&str, &str)> {
        match self {
            AuthConfig::Query { name, value } => Some((name, value)),
            _ => None,
        }
    }
}

fn sensitive_value(value: &str) -> Result<HeaderValue> {
    let mut v = HeaderValue::from_str(value)
        .map_err(|e| HttpToolsError::Config(format!("Invalid auth header value: {e}")))?;
    v.set_sensitive(true);
    Ok(v)
}

// Secrets never reach logs.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::Bearer { .. } => f.write_str("Bearer(***)"),
            AuthConfig::Header { name, .. } => write!(f, "Header({name}: ***)"),
            AuthConfig::Basic { username, .. } => write!(f, "Basic({username}:***)"),
            AuthConfig::Query { name, .. } => write!(f, "Query({name}=***)"),
            AuthConfig::None => f.write_str("None"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tagged_variants() {
        let auth: AuthConfig =
            serde_yaml::from_str("type: header\nname: X-API-Key\nvalue: secret\n").unwrap();
        assert_eq!(
            auth,
            AuthConfig::Header {
                name: "X-API-Key".to_string(),
                value: "secret".to_string()
            }
        );
        assert!(!format!("{auth:?}").contains("secret"));
    }

    #[test]
    fn builds_authorization_headers() {
        let bearer = AuthConfig::Bearer {
            token: "t0k".to_string(),
        };
        assert_eq!(bearer.headers().unwrap()[AUTHORIZATION], "Bearer t0k");

        let basic = AuthConfig::Basic {
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        assert_eq!(basic.headers().unwrap()[AUTHORIZATION], "Basic dXNlcjpwYXNz");

        let query = AuthConfig::Query {
            name: "api_key".to_string(),
            value: "k".to_string(),
        };
        assert!(query.headers().unwrap().is_empty());
        assert_eq!(query.query_pair(), Some(("api_key", "k")));
    }

    #[test]
    fn rejects_invalid_header_name() {
        let auth = AuthConfig::Header {
            name: "bad header".to_string(),
            value: "v".to_string(),
        };
        assert!(matches!(auth.headers(), Err(HttpToolsError::Config(_))));
    }
}
