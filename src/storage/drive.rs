use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use urlencoding::encode;

use super::DocumentStore;
use crate::drive_auth::TokenSource;
use crate::error::{Error, Result};
use crate::po_id::CounterStore;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const TEXT_MIME: &str = "text/plain";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

/// Escapes a value for use inside single quotes in a drive `q` query.
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn folder_query(parent: &str, name: &str) -> String {
    format!(
        "mimeType='{FOLDER_MIME}' and name='{}' and '{}' in parents and trashed=false",
        escape_query(name),
        escape_query(parent)
    )
}

fn file_query(parent: &str, name: &str) -> String {
    format!(
        "name='{}' and '{}' in parents and trashed=false",
        escape_query(name),
        escape_query(parent)
    )
}

/// `multipart/related` body carrying the metadata and the content in one request.
/// Returns the Content-Type header value and the body.
fn multipart_related(metadata: &Value, mime: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let digest = Sha256::digest(bytes);
    let boundary: String = format!("po_part_{digest:x}").chars().take(40).collect();

    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {mime}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (format!("multipart/related; boundary={boundary}"), body)
}

/// Thin Drive v3 REST client. Every call is one request; there are no retries.
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    auth: Arc<dyn TokenSource>,
    root_folder_id: String,
    base_url: String,
}

impl DriveClient {
    pub fn new(auth: Arc<dyn TokenSource>, root_folder_id: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            auth,
            root_folder_id: root_folder_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Points the client at another API host, e.g. a local stand-in.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.base_url)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/drive/v3/files", self.base_url)
    }

    async fn check(resp: Response) -> Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        warn!(status, body = %body, "Drive request failed");
        Err(Error::DriveApi { status, body })
    }

    /// First file matching `query`, if any.
    async fn find(&self, query: &str) -> Result<Option<String>> {
        let url = format!(
            "{}?q={}&spaces=drive&fields={}",
            self.files_url(),
            encode(query),
            encode("files(id, name)")
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(self.auth.bearer().await?)
            .send()
            .await?;
        let list: FileList = Self::check(resp).await?.json().await?;

        let first = list.files.into_iter().next();
        if let Some(file) = &first {
            info!(id = %file.id, name = ?file.name, "Drive lookup hit");
        }
        Ok(first.map(|f| f.id))
    }

    /// Creates an entry with no content. Only used for folders.
    async fn create_folder(&self, parent: &str, name: &str) -> Result<String> {
        let body = json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent],
        });
        let resp = self
            .http
            .post(format!("{}?fields=id", self.files_url()))
            .bearer_auth(self.auth.bearer().await?)
            .json(&body)
            .send()
            .await?;
        let file: DriveFile = Self::check(resp).await?.json().await?;
        info!(id = %file.id, name = %name, parent = %parent, "Drive folder created");
        Ok(file.id)
    }

    /// Creates a file with its content in a single request, so a failed
    /// upload leaves nothing behind.
    async fn create_file(&self, parent: &str, name: &str, mime: &str, bytes: &[u8]) -> Result<String> {
        let metadata = json!({
            "name": name,
            "mimeType": mime,
            "parents": [parent],
        });
        let (content_type, body) = multipart_related(&metadata, mime, bytes);
        let resp = self
            .http
            .post(format!("{}?uploadType=multipart&fields=id", self.upload_url()))
            .bearer_auth(self.auth.bearer().await?)
            .header("Content-Type", content_type)
            .body(body)
            .send()
            .await?;
        let file: DriveFile = Self::check(resp).await?.json().await?;
        info!(id = %file.id, name = %name, parent = %parent, bytes = bytes.len(), "Drive file created");
        Ok(file.id)
    }

    /// Replaces a file's content.
    async fn put_media(&self, file_id: &str, bytes: Vec<u8>, mime: &str) -> Result<()> {
        let resp = self
            .http
            .patch(format!("{}/{}?uploadType=media", self.upload_url(), encode(file_id)))
            .bearer_auth(self.auth.bearer().await?)
            .header("Content-Type", mime)
            .body(bytes)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn download_text(&self, file_id: &str) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/{}?alt=media", self.files_url(), encode(file_id)))
            .bearer_auth(self.auth.bearer().await?)
            .send()
            .await?;
        Ok(Self::check(resp).await?.text().await?)
    }
}

#[async_trait]
impl DocumentStore for DriveClient {
    fn root(&self) -> &str {
        &self.root_folder_id
    }

    async fn folder(&self, parent: &str, name: &str) -> Result<String> {
        match self.find(&folder_query(parent, name)).await? {
            Some(id) => Ok(id),
            None => self.create_folder(parent, name).await,
        }
    }

    async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        bytes: &[u8],
        mime: &str,
    ) -> Result<String> {
        let id = self.create_file(folder, file_name, mime, bytes).await?;
        info!(id = %id, file = %file_name, "Uploaded to drive");
        Ok(id)
    }
}

/// Counter kept as a text file inside a drive folder.
///
/// Drive offers no lock here, so two simultaneous runs can still read the
/// same value; the register's unique PO ID catches that afterwards.
pub struct DriveCounter {
    client: DriveClient,
    folder_id: String,
    file_name: String,
    file_id: Mutex<Option<String>>,
}

impl DriveCounter {
    pub fn new(client: DriveClient, folder_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            client,
            folder_id: folder_id.into(),
            file_name: file_name.into(),
            file_id: Mutex::new(None),
        }
    }

    fn cached_id(&self) -> Option<String> {
        self.file_id.lock().ok().and_then(|id| id.clone())
    }

    fn remember(&self, id: &str) {
        if let Ok(mut cached) = self.file_id.lock() {
            *cached = Some(id.to_string());
        }
    }

    async fn lookup(&self) -> Result<Option<String>> {
        if let Some(id) = self.cached_id() {
            return Ok(Some(id));
        }
        let found = self
            .client
            .find(&file_query(&self.folder_id, &self.file_name))
            .await?;
        if let Some(id) = &found {
            self.remember(id);
        }
        Ok(found)
    }
}

#[async_trait]
impl CounterStore for DriveCounter {
    async fn read(&self) -> Result<Option<String>> {
        match self.lookup().await? {
            Some(id) => Ok(Some(self.client.download_text(&id).await?)),
            None => Ok(None),
        }
    }

    async fn write(&self, content: &str) -> Result<()> {
        match self.lookup().await? {
            Some(id) => {
                self.client
                    .put_media(&id, content.as_bytes().to_vec(), TEXT_MIME)
                    .await
            }
            None => {
                let id = self
                    .client
                    .create_file(&self.folder_id, &self.file_name, TEXT_MIME, content.as_bytes())
                    .await?;
                self.remember(&id);
                Ok(())
            }
        }
    }

    fn describe(&self) -> String {
        format!("drive:{}/{}", self.folder_id, self.file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("O'Brien Traders"), "O\\'Brien Traders");
        assert_eq!(escape_query(r"a\b"), r"a\\b");
        assert_eq!(escape_query("plain"), "plain");
    }

    #[test]
    fn test_folder_query_shape() {
        let q = folder_query("1-las_root", "Vendor's Co");
        assert_eq!(
            q,
            "mimeType='application/vnd.google-apps.folder' and name='Vendor\\'s Co' \
             and '1-las_root' in parents and trashed=false"
        );
    }

    #[test]
    fn test_file_query_shape() {
        let q = file_query("root", "last_po_id.txt");
        assert_eq!(
            q,
            "name='last_po_id.txt' and 'root' in parents and trashed=false"
        );
    }

    #[test]
    fn test_file_list_parses_drive_response() {
        let list: FileList =
            serde_json::from_str(r#"{"files":[{"id":"abc","name":"Acme"}]}"#).unwrap();
        assert_eq!(list.files[0].id, "abc");
        let empty: FileList = serde_json::from_str("{}").unwrap();
        assert!(empty.files.is_empty());
    }

    #[test]
    fn test_multipart_body_layout() {
        let meta = json!({"name": "a.txt"});
        let (content_type, body) = multipart_related(&meta, TEXT_MIME, b"2025-3");
        let boundary = content_type.strip_prefix("multipart/related; boundary=").unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(body.starts_with(&format!("--{boundary}\r\nContent-Type: application/json")));
        assert!(body.contains(r#"{"name":"a.txt"}"#));
        assert!(body.contains("Content-Type: text/plain\r\n\r\n2025-3\r\n"));
        assert!(body.ends_with(&format!("--{boundary}--\r\n")));
    }

    mod against_local_server {
        use super::super::*;
        use crate::po_id::{CounterMode, PoCounter};
        use crate::storage::PDF_MIME;
        use axum::body::Bytes;
        use axum::extract::{Path, Query, State};
        use axum::http::{HeaderMap, StatusCode, header};
        use axum::response::{IntoResponse, Response};
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use std::collections::HashMap;
        use std::sync::atomic::{AtomicBool, Ordering};

        const TOKEN: &str = "test-token";

        struct StaticToken;

        #[async_trait]
        impl TokenSource for StaticToken {
            async fn bearer(&self) -> Result<String> {
                Ok(TOKEN.to_string())
            }
        }

        #[derive(Debug, Clone)]
        struct StoredFile {
            id: String,
            name: String,
            parent: String,
            mime: String,
            content: Vec<u8>,
        }

        /// Just enough of the Drive v3 API for the client.
        #[derive(Default)]
        struct FakeDrive {
            files: Mutex<Vec<StoredFile>>,
            calls: Mutex<Vec<String>>,
            fail_uploads: AtomicBool,
        }

        impl FakeDrive {
            fn files(&self) -> Vec<StoredFile> {
                self.files.lock().unwrap().clone()
            }

            fn calls(&self, prefix: &str) -> usize {
                self.calls.lock().unwrap().iter().filter(|c| c.starts_with(prefix)).count()
            }

            fn add(&self, name: &str, parent: &str, mime: &str, content: Vec<u8>) -> String {
                let mut files = self.files.lock().unwrap();
                let id = format!("id{}", files.len() + 1);
                files.push(StoredFile {
                    id: id.clone(),
                    name: name.to_string(),
                    parent: parent.to_string(),
                    mime: mime.to_string(),
                    content,
                });
                id
            }

            fn log(&self, call: String) {
                self.calls.lock().unwrap().push(call);
            }
        }

        type Fake = Arc<FakeDrive>;

        fn authorized(headers: &HeaderMap) -> bool {
            headers
                .get(header::AUTHORIZATION)
                .is_some_and(|v| v == format!("Bearer {TOKEN}").as_str())
        }

        fn meta_str(meta: &Value, key: &str) -> String {
            meta[key].as_str().unwrap_or_default().to_string()
        }

        async fn list(State(fake): State<Fake>, headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> Response {
            if !authorized(&headers) {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            let q = params.get("q").cloned().unwrap_or_default();
            fake.log(format!("list {q}"));
            let folders_only = q.contains(&format!("mimeType='{FOLDER_MIME}'"));
            let hits: Vec<Value> = fake
                .files()
                .into_iter()
                .filter(|f| q.contains(&format!("name='{}'", escape_query(&f.name))))
                .filter(|f| q.contains(&format!("'{}' in parents", f.parent)))
                .filter(|f| !folders_only || f.mime == FOLDER_MIME)
                .map(|f| json!({"id": f.id, "name": f.name}))
                .collect();
            Json(json!({ "files": hits })).into_response()
        }

        async fn create(State(fake): State<Fake>, headers: HeaderMap, Json(meta): Json<Value>) -> Response {
            if !authorized(&headers) {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            let parent = meta["parents"][0].as_str().unwrap_or_default().to_string();
            fake.log(format!("create {}", meta_str(&meta, "name")));
            let id = fake.add(&meta_str(&meta, "name"), &parent, &meta_str(&meta, "mimeType"), Vec::new());
            Json(json!({ "id": id })).into_response()
        }

        async fn upload(State(fake): State<Fake>, headers: HeaderMap, body: Bytes) -> Response {
            if !authorized(&headers) {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            if fake.fail_uploads.load(Ordering::SeqCst) {
                return (StatusCode::SERVICE_UNAVAILABLE, "backend error").into_response();
            }
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let Some(boundary) = content_type.split("boundary=").nth(1) else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let text = String::from_utf8_lossy(&body).into_owned();
            let parts: Vec<&str> = text
                .split(&format!("--{boundary}"))
                .filter_map(|part| part.split_once("\r\n\r\n").map(|(_, rest)| rest))
                .map(|rest| rest.strip_suffix("\r\n").unwrap_or(rest))
                .collect();
            let [meta, content] = parts.as_slice() else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let meta: Value = serde_json::from_str(meta).unwrap_or_default();
            let parent = meta["parents"][0].as_str().unwrap_or_default().to_string();
            fake.log(format!("upload {}", meta_str(&meta, "name")));
            let id = fake.add(&meta_str(&meta, "name"), &parent, &meta_str(&meta, "mimeType"), content.as_bytes().to_vec());
            Json(json!({ "id": id })).into_response()
        }

        async fn update(State(fake): State<Fake>, headers: HeaderMap, Path(id): Path<String>, body: Bytes) -> Response {
            if !authorized(&headers) {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            if fake.fail_uploads.load(Ordering::SeqCst) {
                return (StatusCode::SERVICE_UNAVAILABLE, "backend error").into_response();
            }
            fake.log(format!("update {id}"));
            let mut files = fake.files.lock().unwrap();
            match files.iter_mut().find(|f| f.id == id) {
                Some(file) => {
                    file.content = body.to_vec();
                    Json(json!({ "id": id })).into_response()
                }
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }

        async fn download(State(fake): State<Fake>, headers: HeaderMap, Path(id): Path<String>) -> Response {
            if !authorized(&headers) {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            fake.log(format!("download {id}"));
            match fake.files().into_iter().find(|f| f.id == id) {
                Some(file) => file.content.into_response(),
                None => (StatusCode::NOT_FOUND, "File not found").into_response(),
            }
        }

        async fn start() -> (Fake, DriveClient) {
            let _ = rustls::crypto::ring::default_provider().install_default();
            let fake = Arc::new(FakeDrive::default());
            let app = Router::new()
                .route("/drive/v3/files", get(list).post(create))
                .route("/drive/v3/files/{id}", get(download))
                .route("/upload/drive/v3/files", post(upload))
                .route("/upload/drive/v3/files/{id}", axum::routing::patch(update))
                .with_state(fake.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            let client = DriveClient::new(Arc::new(StaticToken), "root").with_base_url(format!("http://{addr}/"));
            (fake, client)
        }

        #[tokio::test]
        async fn test_folder_is_reused_once_created() {
            let (fake, client) = start().await;

            let first = client.folder(client.root(), "Acme Traders").await.unwrap();
            let second = client.folder(client.root(), "Acme Traders").await.unwrap();
            assert_eq!(first, second);
            assert_eq!(fake.calls("create "), 1);

            // Same name under another parent is a different folder.
            let nested = client.folder(&first, "Acme Traders").await.unwrap();
            assert_ne!(nested, first);
            assert_eq!(fake.calls("create "), 2);
        }

        #[tokio::test]
        async fn test_upload_returns_file_id_with_content() {
            let (fake, client) = start().await;
            let folder = client.folder(client.root(), "Acme").await.unwrap();

            let id = client
                .upload(&folder, "2025-06-01_2025-001.pdf", b"%PDF-1.5 body", PDF_MIME)
                .await
                .unwrap();

            let stored = fake.files().into_iter().find(|f| f.id == id).unwrap();
            assert_eq!(stored.name, "2025-06-01_2025-001.pdf");
            assert_eq!(stored.parent, folder);
            assert_eq!(stored.mime, PDF_MIME);
            assert_eq!(stored.content, b"%PDF-1.5 body");
            assert_eq!(fake.calls("update "), 0);
        }

        #[tokio::test]
        async fn test_failed_upload_leaves_no_file() {
            let (fake, client) = start().await;
            fake.fail_uploads.store(true, Ordering::SeqCst);

            let err = client
                .upload("root", "2025-06-01_2025-001.pdf", b"%PDF", PDF_MIME)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::DriveApi { status: 503, .. }));
            assert!(fake.files().is_empty());
        }

        #[tokio::test]
        async fn test_missing_file_maps_to_drive_api_error() {
            let (_fake, client) = start().await;
            let err = client.download_text("nope").await.unwrap_err();
            assert!(matches!(err, Error::DriveApi { status: 404, ref body } if body == "File not found"));
        }

        #[tokio::test]
        async fn test_drive_counter_created_then_updated() {
            let (fake, client) = start().await;
            let store = DriveCounter::new(client.clone(), "root", "last_po_id.txt");

            assert_eq!(store.read().await.unwrap(), None);
            store.write("2025-1").await.unwrap();
            assert_eq!(store.read().await.unwrap().as_deref(), Some("2025-1"));
            assert_eq!(fake.calls("upload last_po_id.txt"), 1);

            // A fresh handle finds the file by name and updates it in place.
            let store = DriveCounter::new(client, "root", "last_po_id.txt");
            store.write("2025-2").await.unwrap();
            let files = fake.files();
            assert_eq!(files.len(), 1);
            assert_eq!(files[0].content, b"2025-2");
            assert_eq!(files[0].mime, TEXT_MIME);
            assert_eq!(fake.calls("update "), 1);
        }

        #[tokio::test]
        async fn test_drive_counter_issues_sequence() {
            let (_fake, client) = start().await;
            let counter = PoCounter::new(
                Box::new(DriveCounter::new(client, "root", "last_po_id.txt")),
                CounterMode::Increment,
            );
            assert_eq!(counter.peek(2025).await.unwrap().to_string(), "2025-001");
            assert_eq!(counter.next(2025).await.unwrap().to_string(), "2025-001");
            assert_eq!(counter.next(2025).await.unwrap().to_string(), "2025-002");
        }

        #[tokio::test]
        async fn test_failed_first_counter_write_leaves_nothing() {
            let (fake, client) = start().await;
            fake.fail_uploads.store(true, Ordering::SeqCst);
            let store = DriveCounter::new(client, "root", "last_po_id.txt");

            assert!(matches!(store.write("2025-1").await, Err(Error::DriveApi { .. })));
            fake.fail_uploads.store(false, Ordering::SeqCst);
            assert_eq!(store.read().await.unwrap(), None);
        }
    }
}
