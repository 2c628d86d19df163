// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//
use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream};
use futures::{StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::permission::PermissionLevel;

/// Body of a downloaded file, delivered chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// Body of an upload, relayed to the File API as it arrives from the client.
pub type UploadStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send + Sync>>;

/// Content handed to `create_file` and `patch_file`.
pub struct Upload {
    pub body: UploadStream,
    /// Announced size, when the client sent one.
    pub length: Option<u64>,
}

impl Upload {
    pub fn new(body: UploadStream, length: Option<u64>) -> Self {
        Self { body, length }
    }

    /// Whole content that is already in memory.
    pub fn from_bytes(data: Bytes) -> Self {
        let length = data.len() as u64;
        let body = futures::stream::once(async move { Ok::<_, ApiError>(data) });
        Self::new(Box::pin(body), Some(length))
    }
}

impl Debug for Upload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload").field("length", &self.length).finish_non_exhaustive()
    }
}

/// Trait that defines the interface for interaction with the workspace File API.
///
/// Every call is authenticated with the bearer `token` of the current session. Entities
/// are addressed by ID; `get_by_path` is the only path-based lookup.
#[async_trait]
pub trait FileApi: Send + Sync + Debug {
    /// Resolve an absolute path to its file or folder.
    async fn get_by_path(&self, token: &str, path: &str) -> Result<File, ApiError>;

    /// Create a folder.
    async fn create_folder(&self, token: &str, options: &CreateOptions) -> Result<File, ApiError>;

    /// Upload a new file.
    async fn create_file(
        &self, token: &str, options: &CreateOptions, upload: Upload,
    ) -> Result<File, ApiError>;

    /// Replace the content of an existing file.
    async fn patch_file(
        &self, token: &str, id: &str, name: &str, upload: Upload,
    ) -> Result<File, ApiError>;

    /// Copy files into the folder `target_id`, returning the clones.
    async fn copy(&self, token: &str, target_id: &str, options: &FileIds)
        -> Result<Vec<File>, ApiError>;

    /// Move files into the folder `target_id`, keeping their names.
    async fn move_to(&self, token: &str, target_id: &str, options: &FileIds)
        -> Result<(), ApiError>;

    /// Rename a file in place.
    async fn rename(&self, token: &str, id: &str, options: &FileRename) -> Result<(), ApiError>;

    /// Delete a file or folder.
    async fn delete(&self, token: &str, id: &str) -> Result<(), ApiError>;

    /// Stream the original content of a file.
    async fn download_original(&self, token: &str, file: &File) -> Result<ByteStream, ApiError>;

    /// Health report of the File API itself; needs no token.
    async fn health(&self) -> Result<String, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Folder,
}

/// A downloadable rendition of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    pub extension: String,
    pub size: u64,
}

/// Workspace entity as reported by the File API. Never stored by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Download>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Download>,
    #[serde(default)]
    pub permission: PermissionLevel,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub update_time: Option<String>,
}

impl File {
    pub fn folder(id: &str, workspace_id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            file_type: FileType::Folder,
            parent_id: None,
            version: None,
            original: None,
            preview: None,
            permission: PermissionLevel::None,
            is_shared: false,
            create_time: String::new(),
            update_time: None,
        }
    }

    pub fn file(id: &str, workspace_id: &str, name: &str, original: Download) -> Self {
        Self {
            file_type: FileType::File,
            version: Some(1),
            original: Some(original),
            ..Self::folder(id, workspace_id, name)
        }
    }

    pub fn with_permission(mut self, permission: PermissionLevel) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn is_folder(&self) -> bool {
        self.file_type == FileType::Folder
    }
}

/// Where and under which name a new entity is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOptions {
    pub workspace_id: String,
    pub parent_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIds {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRename {
    pub name: String,
}

/// The default implementation of `FileApi`, talking JSON over HTTP(S).
pub struct HttpFileApi {
    client: Client,
    base_url: String,
}

impl HttpFileApi {
    /// Creates a client for the File API at `base_url`.
    ///
    /// Only connecting is bounded by `connect_timeout` here. Bodies may take as long as they
    /// keep moving, so callers bound response heads and idle bodies themselves.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Box<HttpFileApi>, ApiError> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(HttpFileApi::from_client(base_url, client))
    }

    /// Creates a new instance from a provided `reqwest::Client`.
    pub fn from_client(base_url: &str, client: Client) -> Box<HttpFileApi> {
        Box::new(HttpFileApi {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, token: &str, endpoint: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/v2/files{}", self.base_url, endpoint))
            .bearer_auth(token)
    }

    fn upload_form(name: &str, upload: Upload) -> Form {
        let body = Body::wrap_stream(upload.body);
        let part = match upload.length {
            Some(length) => Part::stream_with_length(body, length),
            None => Part::stream(body),
        };
        Form::new().part("file", part.file_name(name.to_string()))
    }
}

impl Debug for HttpFileApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HttpFileApi({})", self.base_url)
    }
}

#[async_trait]
impl FileApi for HttpFileApi {
    async fn get_by_path(&self, token: &str, path: &str) -> Result<File, ApiError> {
        let resp = self
            .request(Method::GET, token, "")
            .query(&[("path", path)])
            .send()
            .await?;
        json_or_error(resp).await
    }

    async fn create_folder(&self, token: &str, options: &CreateOptions) -> Result<File, ApiError> {
        let resp = self
            .request(Method::POST, token, "")
            .query(&[
                ("type", "folder"),
                ("workspace_id", options.workspace_id.as_str()),
                ("parent_id", options.parent_id.as_str()),
                ("name", options.name.as_str()),
            ])
            .send()
            .await?;
        json_or_error(resp).await
    }

    async fn create_file(
        &self, token: &str, options: &CreateOptions, upload: Upload,
    ) -> Result<File, ApiError> {
        let resp = self
            .request(Method::POST, token, "")
            .query(&[
                ("type", "file"),
                ("workspace_id", options.workspace_id.as_str()),
                ("parent_id", options.parent_id.as_str()),
                ("name", options.name.as_str()),
            ])
            .multipart(HttpFileApi::upload_form(&options.name, upload))
            .send()
            .await?;
        json_or_error(resp).await
    }

    async fn patch_file(
        &self, token: &str, id: &str, name: &str, upload: Upload,
    ) -> Result<File, ApiError> {
        let resp = self
            .request(Method::PATCH, token, &format!("/{}", id))
            .multipart(HttpFileApi::upload_form(name, upload))
            .send()
            .await?;
        json_or_error(resp).await
    }

    async fn copy(
        &self, token: &str, target_id: &str, options: &FileIds,
    ) -> Result<Vec<File>, ApiError> {
        let resp = self
            .request(Method::POST, token, &format!("/{}/copy", target_id))
            .json(options)
            .send()
            .await?;
        json_or_error(resp).await
    }

    async fn move_to(&self, token: &str, target_id: &str, options: &FileIds) -> Result<(), ApiError> {
        let resp = self
            .request(Method::POST, token, &format!("/{}/move", target_id))
            .json(options)
            .send()
            .await?;
        success_or_error(resp).await.map(|_| ())
    }

    async fn rename(&self, token: &str, id: &str, options: &FileRename) -> Result<(), ApiError> {
        let resp = self
            .request(Method::PATCH, token, &format!("/{}/name", id))
            .json(options)
            .send()
            .await?;
        success_or_error(resp).await.map(|_| ())
    }

    async fn delete(&self, token: &str, id: &str) -> Result<(), ApiError> {
        let resp = self
            .request(Method::DELETE, token, "")
            .json(&FileIds { ids: vec![id.to_string()] })
            .send()
            .await?;
        success_or_error(resp).await.map(|_| ())
    }

    async fn download_original(&self, token: &str, file: &File) -> Result<ByteStream, ApiError> {
        let original = file
            .original
            .as_ref()
            .ok_or_else(|| ApiError::Decode(format!("file {} has no original", file.id)))?;
        let resp = self
            .client
            .get(format!(
                "{}/v2/files/{}/original{}",
                self.base_url, file.id, original.extension
            ))
            .query(&[("access_token", token)])
            .send()
            .await?;
        let resp = success_or_error(resp).await?;
        Ok(resp.bytes_stream().map_err(ApiError::from).boxed())
    }

    async fn health(&self) -> Result<String, ApiError> {
        let resp = self
            .client
            .get(format!("{}/v2/health", self.base_url))
            .send()
            .await?;
        Ok(success_or_error(resp).await?.text().await?)
    }
}

async fn success_or_error(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await?;
    Err(ApiError::from_body(status, &body))
}

async fn json_or_error<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let body = success_or_error(resp).await?.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_file() {
        let json = r#"{
            "id": "f1",
            "workspaceId": "ws1",
            "name": "report.pdf",
            "type": "file",
            "parentId": "docs",
            "version": 3,
            "original": {"extension": ".pdf", "size": 1024},
            "permission": "owner",
            "isShared": true,
            "createTime": "2023-05-01T10:00:00Z",
            "updateTime": "2023-05-02T10:00:00Z"
        }"#;
        let file: File = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "f1");
        assert_eq!(file.workspace_id, "ws1");
        assert_eq!(file.file_type, FileType::File);
        assert_eq!(file.parent_id.as_deref(), Some("docs"));
        assert_eq!(
            file.original,
            Some(Download { extension: ".pdf".into(), size: 1024 })
        );
        assert_eq!(file.permission, PermissionLevel::Owner);
        assert!(file.is_shared);
        assert!(file.preview.is_none());
    }

    #[test]
    fn test_decode_root_folder_without_parent() {
        let json = r#"{"id":"root","workspaceId":"ws1","name":"Workspace","type":"folder",
            "permission":"viewer","createTime":"2023-05-01T10:00:00Z"}"#;
        let file: File = serde_json::from_str(json).unwrap();
        assert!(file.is_folder());
        assert!(file.parent_id.is_none());
        assert!(file.original.is_none());
        assert_eq!(file.permission, PermissionLevel::Viewer);
    }

    #[test]
    fn test_encode_request_bodies() {
        let ids = serde_json::to_string(&FileIds { ids: vec!["a".into()] }).unwrap();
        assert_eq!(ids, r#"{"ids":["a"]}"#);
        let options = CreateOptions {
            workspace_id: "ws".into(),
            parent_id: "p".into(),
            name: "n".into(),
        };
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(json, r#"{"workspaceId":"ws","parentId":"p","name":"n"}"#);
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let api = HttpFileApi::from_client("http://api:8080/", Client::new());
        assert_eq!(format!("{:?}", api), "HttpFileApi(http://api:8080)");
    }
}
