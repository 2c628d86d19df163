// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//
use std::fmt::{Debug, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Bearer token issued by the identity service.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of `access_token` in seconds, counted from issue time.
    pub expires_in: u64,
    pub token_type: String,
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

/// Credential presented to the token issuer.
#[derive(Clone, PartialEq, Eq)]
pub enum TokenGrant {
    Password { username: String, password: String },
    RefreshToken(String),
}

impl Debug for TokenGrant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenGrant::Password { username, .. } => write!(f, "Password({})", username),
            TokenGrant::RefreshToken(_) => write!(f, "RefreshToken"),
        }
    }
}

impl TokenGrant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            TokenGrant::Password { .. } => "password",
            TokenGrant::RefreshToken(_) => "refresh_token",
        }
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        let mut form = vec![("grant_type", self.grant_type())];
        match self {
            TokenGrant::Password { username, password } => {
                form.push(("username", username.as_str()));
                form.push(("password", password.as_str()));
            }
            TokenGrant::RefreshToken(refresh_token) => {
                form.push(("refresh_token", refresh_token.as_str()));
            }
        }
        form
    }
}

/// Trait that defines the interface for exchanging credentials against tokens.
#[async_trait]
pub trait TokenIssuer: Send + Sync + Debug {
    async fn exchange(&self, grant: &TokenGrant) -> Result<Token, ApiError>;

    /// Health report of the issuer; needs no credentials.
    async fn health(&self) -> Result<String, ApiError>;
}

/// Token issuer reached over HTTP with form-encoded requests.
pub struct HttpTokenIssuer {
    client: Client,
    base_url: String,
}

impl HttpTokenIssuer {
    /// Token responses are small, so `timeout` bounds each exchange as a whole.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Box<HttpTokenIssuer>, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Box::new(HttpTokenIssuer {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }))
    }
}

impl Debug for HttpTokenIssuer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HttpTokenIssuer({})", self.base_url)
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn exchange(&self, grant: &TokenGrant) -> Result<Token, ApiError> {
        trace!("IDP: exchange {:?}", grant);
        let resp = self
            .client
            .post(format!("{}/v2/token", self.base_url))
            .form(&grant.form())
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ApiError::from_body(status, &body));
        }
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn health(&self) -> Result<String, ApiError> {
        let resp = self
            .client
            .get(format!("{}/v2/health", self.base_url))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ApiError::from_body(status, &body));
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
