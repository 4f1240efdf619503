use std::net::IpAddr;
use std::net::SocketAddr;

use http::HeaderName;
use http::Request;

/// Header carrying an API token. A token takes precedence over the client address.
pub const API_KEY: HeaderName = HeaderName::from_static("api_key");

/// Identifier used when a request carries neither a token nor a client address.
pub const UNKNOWN_IDENTIFIER: &str = "unknown";

/// Resolve the identifier a request is limited under.
///
/// This is the `API_KEY` header value if present and non-empty, otherwise the
/// client IP (without port) taken from the request extensions.
pub fn identify<B>(req: &Request<B>) -> String {
    let token = req
        .headers()
        .get(&API_KEY)
        .and_then(|value| value.to_str().ok())
        .filter(|token| !token.is_empty());

    match token {
        Some(token) => token.to_string(),
        None => remote_ip(req)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTIFIER.to_string()),
    }
}

fn remote_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    #[cfg(feature = "axum")]
    if let Some(axum::extract::ConnectInfo(addr)) = req
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
    {
        return Some(addr.ip());
    }

    req.extensions().get::<SocketAddr>().map(SocketAddr::ip)
}
