// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! workspace-webdav: mount a workspace File API through WebDAV.
//!
//! ```bash
//! API_URL=http://localhost:8080 IDP_URL=http://localhost:8081 workspace-webdav --port 8082
//! ```

use std::process;

use clap::Parser;
use env_logger::Env;
use log::error;
use workspace_webdav::config::Config;
use workspace_webdav::server;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let log_level = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    if let Err(e) = server::serve(config).await {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
