// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

//! Shared fixtures: an in-memory File API that records every call, and a token issuer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use http::{Method, StatusCode};
use hyper::{Body, Request, Response};

use workspace_webdav::api::{
    ByteStream, CreateOptions, Download, File, FileApi, FileIds, FileRename, Upload,
};
use workspace_webdav::error::ApiError;
use workspace_webdav::idp::{Token, TokenGrant, TokenIssuer};
use workspace_webdav::permission::PermissionLevel;
use workspace_webdav::session::SessionContext;

pub const ACCESS_TOKEN: &str = "test-access-token";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetByPath(String),
    CreateFolder(CreateOptions),
    CreateFile(CreateOptions, Vec<u8>),
    PatchFile { id: String, name: String, data: Vec<u8> },
    Copy { target: String, ids: Vec<String> },
    Move { target: String, ids: Vec<String> },
    Rename { id: String, name: String },
    Delete(String),
    Download(String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::GetByPath(_) | Call::Download(_))
    }
}

#[derive(Debug, Default)]
struct State {
    files: Mutex<HashMap<String, File>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<Call>>,
    tokens: Mutex<Vec<String>>,
    fail_rename: AtomicBool,
    fail_delete: AtomicBool,
    lookup_failures: AtomicUsize,
    lookup_delay_ms: AtomicU64,
    chunk_delay_ms: AtomicU64,
    /// Downloads break after this many chunks.
    download_breaks_after: Mutex<Option<usize>>,
    unhealthy: AtomicBool,
}

/// In-memory File API keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MockApi {
    state: Arc<State>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, path: &str, file: File) -> &Self {
        self.state.files.lock().unwrap().insert(path.to_string(), file);
        self
    }

    pub fn add_content(&self, id: &str, data: &[u8]) -> &Self {
        self.state.contents.lock().unwrap().insert(id.to_string(), data.to_vec());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().unwrap().clone()
    }

    pub fn fail_rename(&self) {
        self.state.fail_rename.store(true, Ordering::SeqCst);
    }

    pub fn fail_delete(&self) {
        self.state.fail_delete.store(true, Ordering::SeqCst);
    }

    /// The next `n` lookups fail at the transport level.
    pub fn fail_lookups(&self, n: usize) {
        self.state.lookup_failures.store(n, Ordering::SeqCst);
    }

    pub fn delay_lookups(&self, delay: Duration) {
        self.state.lookup_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every download chunk arrives `delay` after the previous one.
    pub fn delay_chunks(&self, delay: Duration) {
        self.state.chunk_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Downloads fail after delivering `chunks` chunks.
    pub fn break_downloads_after(&self, chunks: usize) {
        *self.state.download_breaks_after.lock().unwrap() = Some(chunks);
    }

    pub fn set_unhealthy(&self) {
        self.state.unhealthy.store(true, Ordering::SeqCst);
    }

    pub fn boxed(&self) -> Box<dyn FileApi> {
        Box::new(self.clone())
    }

    fn record(&self, token: &str, call: Call) {
        self.state.tokens.lock().unwrap().push(token.to_string());
        self.state.calls.lock().unwrap().push(call);
    }
}

fn not_found() -> ApiError {
    ApiError::status(StatusCode::NOT_FOUND, "File not found.")
}

async fn read_upload(upload: Upload) -> Result<Vec<u8>, ApiError> {
    upload
        .body
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
}

#[async_trait]
impl FileApi for MockApi {
    async fn get_by_path(&self, token: &str, path: &str) -> Result<File, ApiError> {
        self.record(token, Call::GetByPath(path.to_string()));
        let delay = self.state.lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let pending = self.state.lookup_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.state.lookup_failures.store(pending - 1, Ordering::SeqCst);
            return Err(ApiError::Transport("connection reset".into()));
        }
        self.state.files.lock().unwrap().get(path).cloned().ok_or_else(not_found)
    }

    async fn create_folder(&self, token: &str, options: &CreateOptions) -> Result<File, ApiError> {
        self.record(token, Call::CreateFolder(options.clone()));
        Ok(File::folder("new-folder-id", &options.workspace_id, &options.name)
            .with_parent(&options.parent_id))
    }

    async fn create_file(
        &self, token: &str, options: &CreateOptions, upload: Upload,
    ) -> Result<File, ApiError> {
        let data = read_upload(upload).await?;
        self.record(token, Call::CreateFile(options.clone(), data.clone()));
        let original = Download { extension: String::new(), size: data.len() as u64 };
        Ok(File::file("new-file-id", &options.workspace_id, &options.name, original))
    }

    async fn patch_file(
        &self, token: &str, id: &str, name: &str, upload: Upload,
    ) -> Result<File, ApiError> {
        let data = read_upload(upload).await?;
        self.record(
            token,
            Call::PatchFile { id: id.to_string(), name: name.to_string(), data: data.clone() },
        );
        let original = Download { extension: String::new(), size: data.len() as u64 };
        Ok(File::file(id, "ws", name, original))
    }

    async fn copy(
        &self, token: &str, target_id: &str, options: &FileIds,
    ) -> Result<Vec<File>, ApiError> {
        self.record(
            token,
            Call::Copy { target: target_id.to_string(), ids: options.ids.clone() },
        );
        Ok(options
            .ids
            .iter()
            .map(|id| File::folder(&format!("{}-clone", id), "ws", id).with_parent(target_id))
            .collect())
    }

    async fn move_to(&self, token: &str, target_id: &str, options: &FileIds) -> Result<(), ApiError> {
        self.record(
            token,
            Call::Move { target: target_id.to_string(), ids: options.ids.clone() },
        );
        Ok(())
    }

    async fn rename(&self, token: &str, id: &str, options: &FileRename) -> Result<(), ApiError> {
        self.record(token, Call::Rename { id: id.to_string(), name: options.name.clone() });
        if self.state.fail_rename.load(Ordering::SeqCst) {
            return Err(ApiError::status(StatusCode::CONFLICT, "Name already taken."));
        }
        Ok(())
    }

    async fn delete(&self, token: &str, id: &str) -> Result<(), ApiError> {
        self.record(token, Call::Delete(id.to_string()));
        if self.state.fail_delete.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection reset".into()));
        }
        Ok(())
    }

    async fn download_original(&self, token: &str, file: &File) -> Result<ByteStream, ApiError> {
        self.record(token, Call::Download(file.id.clone()));
        let data = self.state.contents.lock().unwrap().get(&file.id).cloned().ok_or_else(not_found)?;
        // deliver in small chunks like a real transfer
        let mut chunks: Vec<Result<Bytes, ApiError>> =
            data.chunks(100).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        if let Some(n) = *self.state.download_breaks_after.lock().unwrap() {
            chunks.truncate(n);
            chunks.push(Err(ApiError::Transport("connection reset".into())));
        }
        let delay = Duration::from_millis(self.state.chunk_delay_ms.load(Ordering::SeqCst));
        Ok(stream::iter(chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                chunk
            })
            .boxed())
    }

    async fn health(&self) -> Result<String, ApiError> {
        if self.state.unhealthy.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("connection refused".into()));
        }
        Ok("OK".to_string())
    }
}

/// Token issuer that hands out numbered tokens and counts grants.
#[derive(Debug, Default, Clone)]
pub struct MockIssuer {
    password_grants: Arc<AtomicUsize>,
    refresh_grants: Arc<AtomicUsize>,
    unhealthy: Arc<AtomicBool>,
}

impl MockIssuer {
    pub fn password_grants(&self) -> usize {
        self.password_grants.load(Ordering::SeqCst)
    }

    pub fn refresh_grants(&self) -> usize {
        self.refresh_grants.load(Ordering::SeqCst)
    }

    pub fn set_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TokenIssuer for MockIssuer {
    async fn exchange(&self, grant: &TokenGrant) -> Result<Token, ApiError> {
        match grant {
            TokenGrant::Password { username, password } if password != "secret" => {
                Err(ApiError::status(
                    StatusCode::BAD_REQUEST,
                    &format!("Invalid credentials for {}.", username),
                ))
            }
            TokenGrant::Password { username, .. } => {
                let n = self.password_grants.fetch_add(1, Ordering::SeqCst);
                Ok(token(&format!("{}-{}", username, n), 3600))
            }
            TokenGrant::RefreshToken(_) => {
                let n = self.refresh_grants.fetch_add(1, Ordering::SeqCst);
                Ok(token(&format!("refreshed-{}", n), 3600))
            }
        }
    }

    async fn health(&self) -> Result<String, ApiError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(ApiError::status(StatusCode::SERVICE_UNAVAILABLE, "Down."));
        }
        Ok("OK".to_string())
    }
}

pub fn token(access_token: &str, expires_in: u64) -> Token {
    Token {
        access_token: access_token.to_string(),
        refresh_token: format!("{}-refresh", access_token),
        expires_in,
        token_type: "Bearer".to_string(),
    }
}

pub fn context() -> SessionContext {
    SessionContext::new(&token(ACCESS_TOKEN, 3600), SystemTime::now())
}

pub fn folder(id: &str, workspace_id: &str, name: &str, permission: PermissionLevel) -> File {
    File::folder(id, workspace_id, name).with_permission(permission)
}

pub fn file(id: &str, workspace_id: &str, name: &str, size: u64, permission: PermissionLevel) -> File {
    let extension = name.rfind('.').map(|i| name[i..].to_string()).unwrap_or_default();
    File::file(id, workspace_id, name, Download { extension, size }).with_permission(permission)
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::from_bytes(method.as_bytes()).unwrap())
        .uri(uri)
        .header("Host", "host")
        .body(Body::empty())
        .unwrap()
}

pub fn request_to(method: &str, uri: &str, destination: &str) -> Request<Body> {
    Request::builder()
        .method(Method::from_bytes(method.as_bytes()).unwrap())
        .uri(uri)
        .header("Host", "host")
        .header("Destination", destination)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    hyper::body::to_bytes(response.into_body()).await.unwrap().to_vec()
}
