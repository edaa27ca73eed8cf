//! Request building and execution for generated OCP tools.

pub mod config;
pub mod error;
pub mod executor;
pub mod request;
pub mod safety;
pub mod semantics;

pub use config::AuthConfig;
pub use error::{HttpToolsError, Result};
pub use executor::{DEFAULT_REQUEST_TIMEOUT, HttpExecutor, HttpResponse, ReqwestExecutor};
pub use request::{HttpRequest, build_request, to_json_schema, to_reqwest_method};
pub use safety::{MAX_REDIRECTS, OutboundHttpSafety, RedirectPolicy, redact_url};
pub use semantics::{MethodSemantics, semantics_for_method};
