//! Body plumbing shared by the gateway surfaces.
//!
//! Proxied worker bodies (`hyper::body::Incoming`) and locally built JSON
//! bodies have to flow through one response type; both are boxed into
//! [`ProxyBody`].

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};

/// Unified response body for every gateway answer.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// A complete in-memory body.
pub fn full_body(bytes: Bytes) -> ProxyBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}
