//! Client IP extraction utilities.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap},
};

use crate::cli::ClientIpHeader;

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &HeaderMap;
    fn extensions(&self) -> &Extensions;
}

impl HasHeadersAndExtensions for axum::http::request::Parts {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::http::Request<B> {
    fn headers(&self) -> &HeaderMap {
        axum::http::Request::headers(self)
    }
    fn extensions(&self) -> &Extensions {
        axum::http::Request::extensions(self)
    }
}

/// Extract the client IP address.
///
/// With a configured header the address comes from that header only; a missing or
/// unparseable value is an error and does NOT fall back to the socket address.
/// Without one, the peer address from `ConnectInfo` is used.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    ip_header: Option<ClientIpHeader>,
) -> Result<IpAddr, &'static str> {
    match ip_header {
        Some(header) => {
            let value = source
                .headers()
                .get(header.header_name())
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            header.parse(value)
        }
        None => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip())
            .ok_or("No client IP available"),
    }
}
