// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//
use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

/// Expose a workspace File API as a WebDAV drive.
///
/// Every option can also be given through the environment variable shown next to it.
#[derive(Parser, Debug, Clone)]
#[command(name = "workspace-webdav")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "WEBDAV_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "WEBDAV_PORT", default_value_t = 8082)]
    pub port: u16,

    /// Base URL of the File API
    #[arg(long, env = "API_URL", default_value = "http://127.0.0.1:8080")]
    pub api_url: String,

    /// Base URL of the token issuer
    #[arg(long, env = "IDP_URL", default_value = "http://127.0.0.1:8081")]
    pub idp_url: String,

    /// Seconds allowed for each call to the File API or the token issuer
    #[arg(long = "backend-timeout", env = "BACKEND_TIMEOUT", default_value_t = 30)]
    pub backend_timeout_secs: u64,

    /// Attempts for a path lookup that fails at the transport level
    #[arg(long, env = "LOOKUP_ATTEMPTS", default_value_t = 3)]
    pub lookup_attempts: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs.max(1))
    }
}
