use std::time::Duration;

use async_trait::async_trait;
use boxsync_core::protocol::{
    ChunkUploadResponse, ConflictListResponse, ConflictRecord, ConflictRejection, ErrorResponse,
    FileListEntry, FileListResponse, SupervisorStatus, UploadResponse, VersionListResponse,
    VersionRecord,
};
use boxsync_core::validation::CHUNK_SIZE;
use boxsync_core::FileId;

/// Per-chunk timeout on the chunked upload path.
const CHUNK_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Health probes answer fast or not at all.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("server unreachable: {0}")]
    Offline(String),
    #[error("conflict on {}", .0.file_name)]
    Conflict(Box<ConflictRejection>),
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// The endpoint surface the sync engine needs. `ApiClient` is the real
/// implementation; tests drive the engine with an in-memory stub.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn health(&self) -> bool;
    async fn list_files(&self) -> Result<Vec<FileListEntry>, TransportError>;
    async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        last_modified: i64,
    ) -> Result<UploadResponse, TransportError>;
    async fn download(&self, file_name: &str) -> Result<Vec<u8>, TransportError>;
    async fn delete(&self, file_name: &str) -> Result<(), TransportError>;
    async fn rename(&self, old_name: &str, new_name: &str) -> Result<(), TransportError>;
}

/// HTTP wrapper over the server API (typically the supervisor's public port).
pub struct ApiClient {
    base_url: String,
    client_id: String,
    http: reqwest::Client,
    probe: reqwest::Client,
    chunked: reqwest::Client,
}

impl ApiClient {
    #[must_use]
    pub fn new(base_url: &str, client_id: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client_id: client_id.to_owned(),
            http: client_with_timeout(REQUEST_TIMEOUT),
            probe: client_with_timeout(HEALTH_PROBE_TIMEOUT),
            chunked: client_with_timeout(CHUNK_UPLOAD_TIMEOUT),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn upload_safe(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        last_modified: i64,
    ) -> Result<UploadResponse, TransportError> {
        let form = reqwest::multipart::Form::new()
            .text("file_name", file_name.to_owned())
            .text("client_id", self.client_id.clone())
            .text("last_modified", last_modified.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_owned()),
            );
        let response = self
            .http
            .post(self.url("/files/upload-safe"))
            .multipart(form)
            .send()
            .await
            .map_err(offline)?;
        parse_json(response).await
    }

    /// Split into `CHUNK_SIZE` parts under one random file id. Terminates
    /// early without error when the server reports a duplicate.
    pub async fn upload_chunked(
        &self,
        file_name: &str,
        bytes: &[u8],
        last_modified: i64,
    ) -> Result<UploadResponse, TransportError> {
        let file_id = FileId::generate().to_string();
        let chunks: Vec<&[u8]> = bytes.chunks(CHUNK_SIZE as usize).collect();
        let total_chunks = chunks.len() as u32;
        let mut last: Option<ChunkUploadResponse> = None;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let form = reqwest::multipart::Form::new()
                .text("file_id", file_id.clone())
                .text("chunk_number", (index as u32 + 1).to_string())
                .text("total_chunks", total_chunks.to_string())
                .text("file_name", file_name.to_owned())
                .text("client_id", self.client_id.clone())
                .text("last_modified", last_modified.to_string())
                .part(
                    "chunk",
                    reqwest::multipart::Part::bytes(chunk.to_vec())
                        .file_name(file_name.to_owned()),
                );
            let response = self
                .chunked
                .post(self.url("/files/chunk"))
                .multipart(form)
                .send()
                .await
                .map_err(offline)?;
            let ack: ChunkUploadResponse = parse_json(response).await?;
            let duplicate = ack.duplicate;
            last = Some(ack);
            if duplicate {
                break;
            }
        }

        let ack = last.ok_or_else(|| TransportError::Api {
            status: 500,
            message: "empty upload".to_owned(),
        })?;
        Ok(UploadResponse {
            success: ack.success,
            message: ack.message,
            file_id,
            file_name: file_name.to_owned(),
            version: ack.version.unwrap_or_default(),
            checksum: ack.checksum.unwrap_or_default(),
            size: bytes.len() as u64,
            duplicate: ack.duplicate,
            conflict_id: None,
        })
    }

    pub async fn download_version(
        &self,
        file_name: &str,
        version: u64,
    ) -> Result<Vec<u8>, TransportError> {
        let response = self
            .http
            .get(self.url(&format!("/files/{file_name}/versions/{version}/download")))
            .send()
            .await
            .map_err(offline)?;
        parse_bytes(response).await
    }

    pub async fn versions(&self, file_name: &str) -> Result<Vec<VersionRecord>, TransportError> {
        let response = self
            .http
            .get(self.url(&format!("/files/{file_name}/versions")))
            .send()
            .await
            .map_err(offline)?;
        let body: VersionListResponse = parse_json(response).await?;
        Ok(body.versions)
    }

    pub async fn restore(
        &self,
        file_name: &str,
        version: u64,
    ) -> Result<UploadResponse, TransportError> {
        let response = self
            .http
            .post(self.url(&format!("/files/{file_name}/restore/{version}")))
            .json(&serde_json::json!({ "client_id": self.client_id }))
            .send()
            .await
            .map_err(offline)?;
        parse_json(response).await
    }

    pub async fn conflicts(&self) -> Result<Vec<ConflictRecord>, TransportError> {
        let response = self
            .http
            .get(self.url("/conflicts"))
            .send()
            .await
            .map_err(offline)?;
        let body: ConflictListResponse = parse_json(response).await?;
        Ok(body.conflicts)
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        method: &str,
        keep_version: Option<u64>,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.url(&format!("/conflicts/{conflict_id}/resolve")))
            .json(&serde_json::json!({
                "method": method,
                "keep_version": keep_version,
                "client_id": self.client_id,
            }))
            .send()
            .await
            .map_err(offline)?;
        expect_success(response).await
    }

    pub async fn supervisor_status(&self) -> Result<SupervisorStatus, TransportError> {
        let response = self
            .probe
            .get(self.url("/supervisor/status"))
            .send()
            .await
            .map_err(offline)?;
        parse_json(response).await
    }
}

#[async_trait]
impl RemoteStore for ApiClient {
    async fn health(&self) -> bool {
        match self.probe.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list_files(&self) -> Result<Vec<FileListEntry>, TransportError> {
        let response = self
            .http
            .get(self.url("/files"))
            .send()
            .await
            .map_err(offline)?;
        let body: FileListResponse = parse_json(response).await?;
        Ok(body.files)
    }

    async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        last_modified: i64,
    ) -> Result<UploadResponse, TransportError> {
        if bytes.len() as u64 > CHUNK_SIZE {
            self.upload_chunked(file_name, &bytes, last_modified).await
        } else {
            self.upload_safe(file_name, bytes, last_modified).await
        }
    }

    async fn download(&self, file_name: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .http
            .get(self.url(&format!("/files/{file_name}/download")))
            .send()
            .await
            .map_err(offline)?;
        parse_bytes(response).await
    }

    async fn delete(&self, file_name: &str) -> Result<(), TransportError> {
        let response = self
            .http
            .delete(self.url(&format!("/files/{file_name}")))
            .send()
            .await
            .map_err(offline)?;
        expect_success(response).await
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<(), TransportError> {
        let response = self
            .http
            .post(self.url(&format!("/files/{old_name}/rename")))
            .json(&serde_json::json!({ "new_name": new_name }))
            .send()
            .await
            .map_err(offline)?;
        expect_success(response).await
    }
}

fn client_with_timeout(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

fn offline(error: reqwest::Error) -> TransportError {
    TransportError::Offline(error.to_string())
}

/// Every non-2xx is surfaced to the caller; a 409 carries the parsed
/// conflict document.
async fn api_error(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let bytes = response.bytes().await.unwrap_or_default();
    if status == 409 {
        if let Ok(rejection) = serde_json::from_slice::<ConflictRejection>(&bytes) {
            return TransportError::Conflict(Box::new(rejection));
        }
    }
    let message = serde_json::from_slice::<ErrorResponse>(&bytes)
        .map(|body| body.message.unwrap_or(body.error))
        .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
    TransportError::Api { status, message }
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, TransportError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(offline)?;
    serde_json::from_slice(&bytes).map_err(|error| TransportError::Api {
        status,
        message: format!("unparseable response body: {error}"),
    })
}

async fn parse_bytes(response: reqwest::Response) -> Result<Vec<u8>, TransportError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    Ok(response.bytes().await.map_err(offline)?.to_vec())
}

async fn expect_success(response: reqwest::Response) -> Result<(), TransportError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    Ok(())
}
