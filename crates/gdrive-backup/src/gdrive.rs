//! Google Drive API v3 client implementing the backup engine's `RemoteStore`.
//!
//! Access tokens are obtained per request from an `AccessTokenSource`, so a
//! token that expires mid-run is refreshed transparently.

use std::sync::Arc;

use async_trait::async_trait;
use gdrive_backup_core::{ByteRange, Chunk, DriveUser, ItemQuery, RemoteError, RemoteItem, RemoteStore};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType)";
const PAGE_SIZE: &str = "1000";

/// Supplies a currently valid OAuth access token.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<String>;
}

/// File resource as returned by `files.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct About {
    user: AboutUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AboutUser {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    email_address: String,
}

/// Google Drive API client.
pub struct GDriveClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GDriveClient {
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self::with_base_url(DRIVE_API_BASE, tokens)
    }

    /// Client against a different API root (used by tests).
    pub fn with_base_url(base_url: impl Into<String>, tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| RemoteError::Auth(e.to_string()))?;

        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }

    async fn fetch_media(&self, item_id: &str, range: ByteRange) -> Result<Chunk, RemoteError> {
        let url = format!("{}/files/{}", self.base_url, item_id);
        let request = self
            .http
            .get(&url)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .header(
                reqwest::header::RANGE,
                format!("bytes={}-{}", range.offset, range.last_byte()),
            );
        let resp = self.send(request).await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {
                let total = resp
                    .headers()
                    .get(reqwest::header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range_total)
                    .ok_or_else(|| {
                        RemoteError::Decode(format!("missing Content-Range for {}", item_id))
                    })?;
                let data = read_body(resp).await?;
                Ok(Chunk {
                    data,
                    total_size: Some(total),
                })
            }
            // Range ignored: the body is the whole file
            StatusCode::OK => {
                let body = read_body(resp).await?;
                let total = body.len() as u64;
                let start = range.offset.min(total) as usize;
                Ok(Chunk {
                    data: body[start..].to_vec(),
                    total_size: Some(total),
                })
            }
            // Nothing left at this offset (an empty file when offset is 0)
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(Chunk {
                data: Vec::new(),
                total_size: Some(range.offset),
            }),
            _ => Err(error_from_response(resp).await),
        }
    }

    async fn fetch_export(&self, item_id: &str, mime_type: &str) -> Result<Chunk, RemoteError> {
        let url = format!("{}/files/{}/export", self.base_url, item_id);
        let request = self.http.get(&url).query(&[("mimeType", mime_type)]);
        let resp = self.send(request).await?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        Ok(Chunk {
            data: read_body(resp).await?,
            total_size: None,
        })
    }
}

#[async_trait]
impl RemoteStore for GDriveClient {
    #[instrument(skip(self), level = "debug")]
    async fn list(&self, query: &ItemQuery) -> Result<Vec<RemoteItem>, RemoteError> {
        let url = format!("{}/files", self.base_url);
        let q = build_query(query);
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", q.as_str()),
                ("fields", LIST_FIELDS),
                ("pageSize", PAGE_SIZE),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let resp = self.send(self.http.get(&url).query(&params)).await?;
            if !resp.status().is_success() {
                return Err(error_from_response(resp).await);
            }

            let page: FileList = resp
                .json()
                .await
                .map_err(|e| RemoteError::Decode(e.to_string()))?;
            items.extend(
                page.files
                    .into_iter()
                    .map(|f| RemoteItem::new(f.id, f.name, f.mime_type)),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("{} matched {} item(s)", query, items.len());
        Ok(items)
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch_chunk(
        &self,
        item_id: &str,
        export_mime_type: Option<&str>,
        range: ByteRange,
    ) -> Result<Chunk, RemoteError> {
        match export_mime_type {
            Some(mime_type) => self.fetch_export(item_id, mime_type).await,
            None => self.fetch_media(item_id, range).await,
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn current_user(&self) -> Result<DriveUser, RemoteError> {
        let url = format!("{}/about", self.base_url);
        let resp = self
            .send(self.http.get(&url).query(&[("fields", "user")]))
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }

        let about: About = resp
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(DriveUser {
            display_name: about.user.display_name,
            email_address: about.user.email_address,
        })
    }
}

/// Drive search expression for a listing request.
pub fn build_query(query: &ItemQuery) -> String {
    match query {
        ItemQuery::Named(name) => {
            format!("name = '{}' and trashed = false", escape_literal(name))
        }
        ItemQuery::ChildrenOf(id) => {
            format!("'{}' in parents and trashed = false", escape_literal(id))
        }
    }
}

/// Escape a string literal for the Drive query language.
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Total length from a `Content-Range: bytes 0-1023/5000` header.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.strip_prefix("bytes ")?.rsplit_once('/')?;
    total.trim().parse().ok()
}

async fn read_body(resp: Response) -> Result<Vec<u8>, RemoteError> {
    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| RemoteError::Transport(e.to_string()))
}

async fn error_from_response(resp: Response) -> RemoteError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        RemoteError::Auth(body)
    } else {
        RemoteError::Http {
            status: status.as_u16(),
            body,
        }
    }
}
