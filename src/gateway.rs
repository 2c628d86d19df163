// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use http::header::{ACCEPT_RANGES, ALLOW, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use http::request::Parts;
use http::{HeaderMap, Method, StatusCode};
use hyper::{Body, Request, Response};
use tokio::time::{sleep_until, Instant};

use crate::api::{CreateOptions, File, FileApi, FileIds, FileRename, FileType, Upload};
use crate::body::{IdleTimeout, Progress, RangeRequest};
use crate::error::{ApiError, GatewayError, GatewayResult};
use crate::path::{basename, depth, dirname, resolve_destination, resolve_path};
use crate::permission::{require, PermissionLevel};
use crate::session::SessionContext;

/// Methods announced by OPTIONS.
pub const ALLOWED_METHODS: &str =
    "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, COPY, MOVE, PROPFIND, PROPPATCH";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOOKUP_ATTEMPTS: u32 = 3;

const LOOKUP_BACKOFF: Duration = Duration::from_millis(100);

/// Translates WebDAV requests into File API calls.
#[derive(Debug, Clone)]
pub struct Gateway {
    api: Arc<Box<dyn FileApi>>,
    timeout: Duration,
    lookup_attempts: u32,
}

impl Gateway {
    pub fn new(api: Box<dyn FileApi>) -> Gateway {
        Gateway {
            api: Arc::new(api),
            timeout: DEFAULT_TIMEOUT,
            lookup_attempts: DEFAULT_LOOKUP_ATTEMPTS,
        }
    }

    /// Upper bound for every single backend call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How many times a path lookup is tried when the transport fails.
    pub fn with_lookup_attempts(mut self, attempts: u32) -> Self {
        self.lookup_attempts = attempts.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Checks that the File API answers its health endpoint.
    pub async fn health(&self) -> GatewayResult<String> {
        self.bounded("health", self.api.health()).await
    }

    /// Serves one request on behalf of the session in `ctx`. Always yields a response.
    pub async fn handle(&self, req: Request<Body>, ctx: &SessionContext) -> Response<Body> {
        let (parts, body) = req.into_parts();
        debug!("DAV: {} {}", parts.method, parts.uri);
        let result = match parts.method.as_str() {
            "OPTIONS" => Ok(options()),
            "GET" => self.get(&parts, ctx).await,
            "HEAD" => self.head(&parts, ctx).await,
            "PUT" => self.put(&parts, body, ctx).await,
            "DELETE" => self.delete(&parts, ctx).await,
            "MKCOL" => self.mkcol(&parts, ctx).await,
            "COPY" => self.copy(&parts, ctx).await,
            "MOVE" => self.mv(&parts, ctx).await,
            other => Err(GatewayError::NotImplemented(other.to_string())),
        };
        match result {
            Ok(response) => response,
            Err(e) => {
                error!("DAV: {} {} failed: {}", parts.method, parts.uri.path(), e);
                e.into_response()
            }
        }
    }

    async fn get(&self, parts: &Parts, ctx: &SessionContext) -> GatewayResult<Response<Body>> {
        let path = resolve_path(parts.uri.path())?;
        let file = self.lookup(ctx, &path).await?;
        let size = match &file.original {
            Some(original) => original.size,
            None => {
                return Err(GatewayError::Internal(format!("{} has no original content", path)))
            }
        };
        let range = match parts.headers.get(RANGE).and_then(|v| v.to_str().ok()) {
            Some(header) => RangeRequest::parse(header, size),
            None => RangeRequest::Full,
        };
        if range == RangeRequest::Unsatisfiable {
            return Ok(Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(CONTENT_RANGE, format!("bytes */{}", size))
                .body(Body::empty())?);
        }

        let stream = self
            .bounded("downloadOriginal", self.api.download_original(ctx.access_token(), &file))
            .await?;
        let stream = IdleTimeout::new(stream, self.timeout).boxed();
        let response = Response::builder()
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(ACCEPT_RANGES, "bytes");
        let (response, stream) = match range {
            RangeRequest::Partial(range) => (
                response
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(CONTENT_RANGE, range.content_range(size))
                    .header(CONTENT_LENGTH, range.length()),
                range.slice(stream),
            ),
            _ => (
                response.status(StatusCode::OK).header(CONTENT_LENGTH, size),
                stream,
            ),
        };
        let stream = stream.inspect_err(move |e| error!("DAV: GET {} aborted: {}", path, e));
        Ok(response.body(Body::wrap_stream(stream))?)
    }

    async fn head(&self, parts: &Parts, ctx: &SessionContext) -> GatewayResult<Response<Body>> {
        let path = resolve_path(parts.uri.path())?;
        let file = self.lookup(ctx, &path).await?;
        let mut response = Response::builder().status(StatusCode::OK);
        if file.file_type == FileType::File {
            let size = file.original.as_ref().map_or(0, |o| o.size);
            response = response
                .header(CONTENT_LENGTH, size)
                .header(ACCEPT_RANGES, "bytes");
        }
        Ok(response.body(Body::empty())?)
    }

    async fn put(
        &self, parts: &Parts, body: Body, ctx: &SessionContext,
    ) -> GatewayResult<Response<Body>> {
        let path = resolve_path(parts.uri.path())?;
        let name = basename(&path)
            .ok_or_else(|| GatewayError::ClientInput("cannot PUT the root".to_string()))?
            .to_string();
        if is_lock_file(&name) {
            trace!("DAV: ignoring lock file {}", path);
            return status(StatusCode::OK);
        }
        let parent = self.lookup(ctx, &dirname(&path)).await?;
        require(&parent, PermissionLevel::Editor)?;
        let token = ctx.access_token();
        let existing = match self.lookup(ctx, &path).await {
            Ok(existing) if existing.is_folder() => {
                return Err(GatewayError::ClientInput(format!("{} is a collection", path)))
            }
            Ok(existing) => Some(existing),
            Err(GatewayError::Api(e)) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let progress = Progress::new();
        let upload = upload(body, &parts.headers, &progress);
        match existing {
            Some(existing) => {
                let call = self.api.patch_file(token, &existing.id, &name, upload);
                self.bounded_by_progress("patchFile", &progress, call).await?;
                status(StatusCode::NO_CONTENT)
            }
            None => {
                let options = CreateOptions {
                    workspace_id: parent.workspace_id.clone(),
                    parent_id: parent.id.clone(),
                    name,
                };
                let call = self.api.create_file(token, &options, upload);
                self.bounded_by_progress("createFile", &progress, call).await?;
                status(StatusCode::CREATED)
            }
        }
    }

    async fn delete(&self, parts: &Parts, ctx: &SessionContext) -> GatewayResult<Response<Body>> {
        let path = resolve_path(parts.uri.path())?;
        let file = self.lookup(ctx, &path).await?;
        require(&file, PermissionLevel::Owner)?;
        self.bounded("delete", self.api.delete(ctx.access_token(), &file.id))
            .await?;
        status(StatusCode::NO_CONTENT)
    }

    async fn mkcol(&self, parts: &Parts, ctx: &SessionContext) -> GatewayResult<Response<Body>> {
        let path = resolve_path(parts.uri.path())?;
        let name = basename(&path)
            .ok_or_else(|| GatewayError::ClientInput("the root already exists".to_string()))?;
        let parent = self.lookup(ctx, &dirname(&path)).await?;
        require(&parent, PermissionLevel::Editor)?;
        let options = CreateOptions {
            workspace_id: parent.workspace_id.clone(),
            parent_id: parent.id.clone(),
            name: name.to_string(),
        };
        self.bounded("createFolder", self.api.create_folder(ctx.access_token(), &options))
            .await?;
        status(StatusCode::CREATED)
    }

    async fn copy(&self, parts: &Parts, ctx: &SessionContext) -> GatewayResult<Response<Body>> {
        let transfer = self.transfer(parts, ctx).await?;
        let token = ctx.access_token();
        let ids = FileIds { ids: vec![transfer.source.id.clone()] };
        let clones = self
            .bounded("copy", self.api.copy(token, &transfer.target.id, &ids))
            .await?;
        let clone = clones.into_iter().next().ok_or_else(|| {
            GatewayError::Internal(format!("copy of {} returned no clone", transfer.source.id))
        })?;

        let rename = FileRename { name: transfer.name.clone() };
        if let Err(e) = self.bounded("rename", self.api.rename(token, &clone.id, &rename)).await {
            warn!("DAV: COPY rename of clone {} failed, removing it", clone.id);
            if let Err(cleanup) = self.bounded("delete", self.api.delete(token, &clone.id)).await {
                error!("DAV: orphaned clone {} left behind: {}", clone.id, cleanup);
            }
            return Err(GatewayError::Internal(format!(
                "rename of clone {} failed: {}",
                clone.id, e
            )));
        }
        status(StatusCode::NO_CONTENT)
    }

    async fn mv(&self, parts: &Parts, ctx: &SessionContext) -> GatewayResult<Response<Body>> {
        let transfer = self.transfer(parts, ctx).await?;
        let token = ctx.access_token();
        if transfer.is_rename() {
            let rename = FileRename { name: transfer.name.clone() };
            self.bounded("rename", self.api.rename(token, &transfer.source.id, &rename))
                .await?;
        } else {
            if basename(&transfer.source_path) != Some(transfer.name.as_str()) {
                warn!(
                    "DAV: MOVE {} -> {} keeps the name {:?}",
                    transfer.source_path, transfer.destination_path, transfer.source.name
                );
            }
            let ids = FileIds { ids: vec![transfer.source.id.clone()] };
            self.bounded("move", self.api.move_to(token, &transfer.target.id, &ids))
                .await?;
        }
        status(StatusCode::NO_CONTENT)
    }

    /// Resolves both ends of a COPY or MOVE and checks they share a workspace.
    async fn transfer(&self, parts: &Parts, ctx: &SessionContext) -> GatewayResult<Transfer> {
        let source_path = resolve_path(parts.uri.path())?;
        let destination_path = resolve_destination(&parts.headers)?
            .ok_or_else(|| GatewayError::ClientInput("missing Destination header".to_string()))?;
        let name = basename(&destination_path)
            .ok_or_else(|| GatewayError::ClientInput("Destination is the root".to_string()))?
            .to_string();
        let source = self.lookup(ctx, &source_path).await?;
        let target = self.lookup(ctx, &dirname(&destination_path)).await?;
        if source.workspace_id != target.workspace_id {
            return Err(GatewayError::CrossBoundary {
                source_workspace: source.workspace_id,
                target_workspace: target.workspace_id,
            });
        }
        Ok(Transfer { source_path, destination_path, name, source, target })
    }

    /// Resolves `path`, retrying transport failures.
    async fn lookup(&self, ctx: &SessionContext, path: &str) -> GatewayResult<File> {
        let mut attempt = 1;
        loop {
            trace!("DAV: getByPath {:?} (attempt {})", path, attempt);
            let result = self
                .bounded("getByPath", self.api.get_by_path(ctx.access_token(), path))
                .await;
            match result {
                Err(GatewayError::Api(ref e)) if e.is_transient() && attempt < self.lookup_attempts => {
                    debug!("DAV: getByPath {:?} failed transiently: {}", path, e);
                }
                Err(GatewayError::Timeout(_)) if attempt < self.lookup_attempts => {
                    debug!("DAV: getByPath {:?} timed out", path);
                }
                other => return other,
            }
            tokio::time::sleep(LOOKUP_BACKOFF * attempt).await;
            attempt += 1;
        }
    }

    /// Like [`Gateway::bounded`], but the clock restarts whenever the upload moves.
    async fn bounded_by_progress<T, F>(
        &self, operation: &'static str, progress: &Progress, call: F,
    ) -> GatewayResult<T>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        tokio::pin!(call);
        loop {
            let deadline = progress.last() + self.timeout;
            tokio::select! {
                result = &mut call => return result.map_err(GatewayError::from),
                _ = sleep_until(deadline) => {
                    if progress.last() + self.timeout <= Instant::now() {
                        return Err(GatewayError::Timeout(operation));
                    }
                }
            }
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> GatewayResult<T>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::Timeout(operation)),
        }
    }
}

/// Both ends of a COPY or MOVE.
#[derive(Debug)]
struct Transfer {
    source_path: String,
    destination_path: String,
    /// Name the resource should carry at its destination.
    name: String,
    source: File,
    /// Folder that receives the resource.
    target: File,
}

impl Transfer {
    /// Same folder on both sides: the resource only changes its name.
    fn is_rename(&self) -> bool {
        depth(&self.source_path) == depth(&self.destination_path)
            && dirname(&self.source_path) == dirname(&self.destination_path)
    }
}

/// Answer to OPTIONS; independent of credentials and permissions.
pub fn options() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    response
        .headers_mut()
        .insert(ALLOW, http::HeaderValue::from_static(ALLOWED_METHODS));
    response
}

pub(crate) fn is_options(method: &Method) -> bool {
    method == Method::OPTIONS
}

/// Relays the request body as it arrives, recording each chunk in `progress`.
fn upload(body: Body, headers: &HeaderMap, progress: &Progress) -> Upload {
    let length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let progress = progress.clone();
    let stream = body
        .map_err(|e| ApiError::Transport(format!("client body: {}", e)))
        .inspect_ok(move |_| progress.touch());
    Upload::new(Box::pin(stream), length)
}

fn status(code: StatusCode) -> GatewayResult<Response<Body>> {
    Ok(Response::builder().status(code).body(Body::empty())?)
}

/// Lock files written by office suites next to the document being edited.
fn is_lock_file(name: &str) -> bool {
    name.starts_with("~$") || name.starts_with(".~lock.")
}
