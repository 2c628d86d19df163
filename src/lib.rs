// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! WebDAV gateway for an ID-addressed workspace File API.
//!
//! WebDAV clients speak in paths; the File API speaks in file IDs. The [`Gateway`] resolves
//! the paths of each request with `getByPath`, checks permissions and workspace boundaries,
//! and issues the matching ID-based calls. [`GatewayService`] puts HTTP Basic sign-in and
//! per-user token sessions in front of it.

#[macro_use]
extern crate log;

use crate::api::FileApi;
use crate::gateway::Gateway;

pub mod api;
pub mod body;
pub mod config;
pub mod error;
pub mod gateway;
pub mod idp;
pub mod path;
pub mod permission;
pub mod server;
pub mod session;

pub use crate::server::GatewayService;

/// Creates a WebDAV gateway backed by `api`
pub fn make_server(api: Box<dyn FileApi>) -> Gateway {
    Gateway::new(api)
}
