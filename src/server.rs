// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! HTTP front of the gateway: credentials, sessions and the accept loop.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};

use crate::api::{FileApi, HttpFileApi};
use crate::config::Config;
use crate::error::{ApiError, GatewayError};
use crate::gateway::{self, Gateway};
use crate::idp::{HttpTokenIssuer, TokenIssuer};
use crate::session::SessionStore;

pub const HEALTH_PATH: &str = "/v3/health";
pub const VERSION_PATH: &str = "/version";

/// Authenticates requests and hands them to the [`Gateway`] with the caller's session.
#[derive(Debug, Clone)]
pub struct GatewayService {
    gateway: Gateway,
    issuer: Arc<Box<dyn TokenIssuer>>,
    sessions: SessionStore,
}

impl GatewayService {
    pub fn new(gateway: Gateway, issuer: Box<dyn TokenIssuer>) -> Self {
        Self {
            gateway,
            issuer: Arc::new(issuer),
            sessions: SessionStore::default(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        if gateway::is_options(req.method()) {
            return gateway::options();
        }
        if req.method() == Method::GET {
            match req.uri().path() {
                HEALTH_PATH => return self.health().await,
                VERSION_PATH => return version(),
                _ => {}
            }
        }
        let (username, password) = match basic_credentials(req.headers()) {
            Some(credentials) => credentials,
            None => {
                debug!("AUTH: {} {} without credentials", req.method(), req.uri().path());
                return GatewayError::Unauthenticated("missing credentials".to_string())
                    .into_response();
            }
        };
        let issuer: &dyn TokenIssuer = &**self.issuer;
        match self
            .sessions
            .authenticate(issuer, &username, &password, SystemTime::now())
            .await
        {
            Ok(ctx) => self.gateway.handle(req, &ctx).await,
            Err(e) => {
                error!("AUTH: {} could not be signed in: {}", username, e);
                e.into_response()
            }
        }
    }

    /// `OK` when both the File API and the token issuer answer their health endpoints.
    async fn health(&self) -> Response<Body> {
        let issuer = async {
            match tokio::time::timeout(self.gateway.timeout(), self.issuer.health()).await {
                Ok(result) => result.map_err(GatewayError::from),
                Err(_) => Err(GatewayError::Timeout("idp health")),
            }
        };
        let (api, issuer) = futures::join!(self.gateway.health(), issuer);
        let mut failures = Vec::new();
        if let Err(e) = api {
            failures.push(format!("file api: {}", e));
        }
        if let Err(e) = issuer {
            failures.push(format!("token issuer: {}", e));
        }
        let (status, body) = if failures.is_empty() {
            (StatusCode::OK, "OK")
        } else {
            error!("HEALTH: {}", failures.join("; "));
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        };
        plain(status, body)
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Build version of the gateway as JSON.
fn version() -> Response<Body> {
    let body = serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }).to_string();
    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
    response
}

/// Extracts `user:password` from a Basic `Authorization` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    if username.is_empty() {
        return None;
    }
    Some((username.to_string(), password.to_string()))
}

/// Builds the production service from `config`.
pub fn make_service(config: &Config) -> Result<GatewayService, ApiError> {
    let api: Box<dyn FileApi> = HttpFileApi::new(&config.api_url, config.backend_timeout())?;
    let issuer = HttpTokenIssuer::new(&config.idp_url, config.backend_timeout())?;
    let gateway = Gateway::new(api)
        .with_timeout(config.backend_timeout())
        .with_lookup_attempts(config.lookup_attempts);
    Ok(GatewayService::new(gateway, issuer))
}

/// Serves WebDAV on the configured address until Ctrl+C.
pub async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = make_service(&config)?;
    let addr = SocketAddr::new(config.host, config.port);

    let make_service = make_service_fn(move |_| {
        let service = service.clone();
        async move {
            let func = move |req| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(service.handle(req).await) }
            };
            Ok::<_, Infallible>(service_fn(func))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("WebDAV gateway listening on http://{}", server.local_addr());
    info!("File API: {}, token issuer: {}", config.api_url, config.idp_url);

    server
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Signal handler error: {}", e);
            }
            info!("WebDAV gateway shutting down");
        })
        .await?;
    Ok(())
}
