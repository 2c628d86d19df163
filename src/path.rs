// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Resolution of request URLs and `Destination` headers into workspace paths.
//!
//! Paths handed out by this module are decoded, absolute, `/`-separated and carry no
//! trailing slash except for the root itself.

use std::path::PathBuf;
use std::str::FromStr;

use http::header::HOST;
use http::uri::PathAndQuery;
use http::{HeaderMap, Uri};
use webdav_handler::davpath::DavPath;

use crate::error::{GatewayError, GatewayResult};

pub const DESTINATION: &str = "destination";

/// Decodes and normalizes a percent-encoded request path.
pub fn resolve_path(raw: &str) -> GatewayResult<String> {
    if raw.is_empty() {
        return Err(GatewayError::ClientInput("empty path".to_string()));
    }
    if !valid_escapes(raw) {
        return Err(GatewayError::ClientInput(format!("malformed escape in {:?}", raw)));
    }
    let dav_path = DavPath::new(raw)
        .map_err(|_| GatewayError::ClientInput(format!("invalid path {:?}", raw)))?;
    pb_to_string(dav_path.as_pathbuf())
}

/// Reads the `Destination` header of a COPY or MOVE request.
///
/// Accepts an absolute `http(s)` URL, an absolute path, or the host-relative form where the
/// value starts with the request's `Host`. Returns `Ok(None)` when the header is absent and a
/// client error when it is present but unusable.
pub fn resolve_destination(headers: &HeaderMap) -> GatewayResult<Option<String>> {
    let value = match headers.get(DESTINATION) {
        None => return Ok(None),
        Some(value) => value
            .to_str()
            .map_err(|_| invalid_destination("header is not visible ASCII"))?
            .trim(),
    };
    if value.is_empty() {
        return Err(invalid_destination("header is empty"));
    }

    let path = if value.starts_with("http://") || value.starts_with("https://") {
        let uri = Uri::from_str(value).map_err(|e| invalid_destination(&e.to_string()))?;
        if uri.host().map_or(true, str::is_empty) {
            return Err(invalid_destination("URL has no host"));
        }
        uri.path().to_string()
    } else if value.starts_with('/') && !value.starts_with("//") {
        parse_path_and_query(value)?
    } else {
        let host = headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid_destination("relative form requires a Host header"))?;
        let rest = value
            .strip_prefix("//")
            .unwrap_or(value)
            .strip_prefix(host)
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| invalid_destination("value does not start with the request host"))?;
        parse_path_and_query(rest)?
    };
    resolve_path(&path).map(Some)
}

/// Every `%` must start a two-digit hex escape.
fn valid_escapes(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some([hi, lo]) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => i += 3,
                _ => return false,
            }
        } else {
            i += 1;
        }
    }
    true
}

fn parse_path_and_query(value: &str) -> GatewayResult<String> {
    let pq = PathAndQuery::from_str(value).map_err(|e| invalid_destination(&e.to_string()))?;
    Ok(pq.path().to_string())
}

fn invalid_destination(reason: &str) -> GatewayError {
    GatewayError::ClientInput(format!("invalid Destination: {}", reason))
}

/// Parent of `path`; the root is its own parent.
pub fn dirname(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        None | Some(0) => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

/// Last segment of `path`, `None` for the root.
pub fn basename(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

/// Number of segments in `path`.
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

#[inline]
fn pb_to_string(path: PathBuf) -> GatewayResult<String> {
    path.into_os_string()
        .into_string()
        .map_err(|p| GatewayError::ClientInput(format!("path {:?} is not UTF-8", p)))
}
