//! Google Drive v3 document store.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::credential::CredentialSession;
use super::{DocumentStore, Result, check_status};
use crate::error::RemoteError;
use crate::models::receipt::SourceItem;

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const BOUNDARY: &str = "slips-multipart-boundary-5f0c2a7e9b1d";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
}

impl From<DriveFile> for SourceItem {
    fn from(file: DriveFile) -> Self {
        let item = SourceItem::new(file.id, file.name);
        match file.mime_type {
            Some(mime) => item.with_mime_type(mime),
            None => item,
        }
    }
}

/// Escape a value for use inside a single-quoted Drive query literal.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build a `multipart/related` upload body: JSON metadata part, then media part.
fn multipart_related(metadata: &serde_json::Value, mime_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Document store backed by Google Drive.
///
/// Folders are resolved by name, so two folders with the same name are
/// indistinguishable; the first match wins.
pub struct DriveStore {
    http: reqwest::Client,
    session: Mutex<CredentialSession>,
    page_size: u32,
    api_base: String,
    upload_base: String,
}

impl DriveStore {
    pub fn new(http: reqwest::Client, session: CredentialSession) -> Self {
        Self {
            http,
            session: Mutex::new(session),
            page_size: 100,
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 1000);
        self
    }

    /// Point the store at different API hosts.
    pub fn with_endpoints(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    /// Take back the credential session, e.g. to release it at the end of a run.
    pub fn into_session(self) -> CredentialSession {
        self.session.into_inner()
    }

    async fn bearer(&self) -> Result<String> {
        self.session.lock().await.bearer().await
    }

    async fn query(&self, q: &str, page_token: Option<&str>) -> Result<FileList> {
        let token = self.bearer().await?;
        let page_size = self.page_size.to_string();

        let mut params = vec![
            ("q", q),
            ("fields", "nextPageToken, files(id, name, mimeType)"),
            ("pageSize", page_size.as_str()),
            ("orderBy", "name"),
            ("spaces", "drive"),
        ];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token));
        }

        let response = self
            .http
            .get(format!("{}/files", self.api_base))
            .bearer_auth(token)
            .query(&params)
            .send()
            .await?;
        let list: FileList = check_status(response).await?.json().await?;
        Ok(list)
    }
}

#[async_trait]
impl DocumentStore for DriveStore {
    async fn find_folder(&self, name: &str) -> Result<Option<String>> {
        let q = format!(
            "name = '{}' and mimeType = '{}' and trashed = false",
            escape_query(name),
            FOLDER_MIME_TYPE
        );
        let list = self.query(&q, None).await?;
        let id = list.files.into_iter().next().map(|f| f.id);

        debug!("Folder {:?} resolved to {:?}", name, id);
        Ok(id)
    }

    async fn list(&self, folder_id: &str) -> Result<Vec<SourceItem>> {
        let q = format!("'{}' in parents and trashed = false", escape_query(folder_id));

        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.query(&q, page_token.as_deref()).await?;
            trace!("Listed page with {} files", page.files.len());

            items.extend(
                page.files
                    .into_iter()
                    .filter(|f| f.mime_type.as_deref() != Some(FOLDER_MIME_TYPE))
                    .map(SourceItem::from),
            );

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        debug!("Listed {} files in folder {}", items.len(), folder_id);
        Ok(items)
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!("{}/files/{}", self.api_base, id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let bytes = check_status(response).await?.bytes().await?;

        debug!("Downloaded {} bytes for {}", bytes.len(), id);
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        name: &str,
        mime_type: &str,
        data: &[u8],
        folder_id: &str,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }

        let metadata = json!({
            "name": name,
            "parents": [folder_id],
            "mimeType": mime_type,
        });
        let body = multipart_related(&metadata, mime_type, data);

        let token = self.bearer().await?;
        let response = self
            .http
            .post(format!("{}/files", self.upload_base))
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", BOUNDARY),
            )
            .body(body)
            .send()
            .await?;
        let created: Created = check_status(response).await?.json().await?;

        if created.id.is_empty() {
            return Err(RemoteError::Decode("upload returned an empty id".to_string()));
        }
        debug!("Uploaded {} as {}", name, created.id);
        Ok(created.id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let token = self.bearer().await?;
        let response = self
            .http
            .delete(format!("{}/files/{}", self.api_base, id))
            .bearer_auth(token)
            .send()
            .await?;
        check_status(response).await?;

        debug!("Deleted {}", id);
        Ok(())
    }
}
