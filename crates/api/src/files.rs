use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use boxsync_core::protocol::{
    ChunkUploadResponse, FileListEntry, FileListResponse, RenameRequest, RestoreRequest,
    SimpleResponse, UploadResponse, VersionListResponse, VersionRecord,
};
use boxsync_core::validation::{validate_file_name, CHUNK_SIZE, MAX_FILE_SIZE};
use boxsync_storage::{
    commit_version, ChunkOutcome, ChunkPart, NewVersion, SafeUploadOutcome, UploadRequest,
};

use crate::error::{error_response, storage_error, HttpFailure};
use crate::ApiState;

const UP_TO_DATE_MESSAGE: &str = "File already up-to-date, no new version created";

struct SafeUploadForm {
    file_name: String,
    client_id: String,
    last_modified: i64,
    bytes: Bytes,
}

struct ChunkForm {
    file_id: String,
    chunk_number: u32,
    total_chunks: u32,
    file_name: String,
    client_id: String,
    last_modified: i64,
    bytes: Bytes,
}

pub(crate) async fn list_files(State(state): State<ApiState>) -> Response {
    let stores = state.stores();
    let names = match stores.content.list().await {
        Ok(names) => names,
        Err(error) => return storage_error(error),
    };

    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let latest = match stores.metadata.get_latest(&name).await {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                tracing::warn!(file = %name, "current blob has no metadata record");
                continue;
            }
            Err(error) => return storage_error(error),
        };
        let total_versions = match stores.metadata.get_all_versions(&name).await {
            Ok(versions) => versions.len() as u64,
            Err(error) => return storage_error(error),
        };
        files.push(FileListEntry {
            name,
            last_modified: latest.last_modified,
            size: latest.size,
            version: latest.version,
            client_id: latest.client_id,
            total_versions,
            checksum: Some(latest.checksum),
        });
    }

    Json(FileListResponse {
        success: true,
        files,
    })
    .into_response()
}

pub(crate) async fn upload_safe(
    State(state): State<ApiState>,
    multipart: Multipart,
) -> Response {
    let form = match parse_safe_upload(multipart).await {
        Ok(form) => form,
        Err(failure) => return failure.into_response(),
    };
    if form.bytes.len() as u64 > MAX_FILE_SIZE {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("file exceeds {} MB limit", MAX_FILE_SIZE / (1024 * 1024)),
        );
    }

    let stores = state.stores();
    let outcome = stores
        .conflicts
        .upload_safe(
            &stores.content,
            &stores.metadata,
            UploadRequest {
                file_name: &form.file_name,
                client_id: &form.client_id,
                last_modified: form.last_modified,
                bytes: &form.bytes,
            },
        )
        .await;

    match outcome {
        Ok(SafeUploadOutcome::AlreadyUpToDate { record }) => {
            Json(upload_response(&record, UP_TO_DATE_MESSAGE, true, None)).into_response()
        }
        Ok(SafeUploadOutcome::Stored { record }) => {
            Json(upload_response(&record, "File uploaded", false, None)).into_response()
        }
        Ok(SafeUploadOutcome::ConflictWinner {
            record,
            conflict_id,
        }) => Json(upload_response(
            &record,
            "File uploaded; concurrent modification recorded",
            false,
            Some(conflict_id),
        ))
        .into_response(),
        Ok(SafeUploadOutcome::ConflictLoser(rejection)) => {
            (StatusCode::CONFLICT, Json(*rejection)).into_response()
        }
        Err(error) => storage_error(error),
    }
}

pub(crate) async fn upload_chunk(
    State(state): State<ApiState>,
    multipart: Multipart,
) -> Response {
    let form = match parse_chunk_upload(multipart).await {
        Ok(form) => form,
        Err(failure) => return failure.into_response(),
    };
    if form.bytes.len() as u64 > CHUNK_SIZE {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("chunk exceeds {} MB limit", CHUNK_SIZE / (1024 * 1024)),
        );
    }

    let stores = state.stores();
    let outcome = stores
        .chunks
        .accept(
            &stores.content,
            &stores.metadata,
            ChunkPart {
                file_id: &form.file_id,
                chunk_number: form.chunk_number,
                total_chunks: form.total_chunks,
                file_name: &form.file_name,
                client_id: &form.client_id,
                last_modified: form.last_modified,
                bytes: &form.bytes,
            },
        )
        .await;

    match outcome {
        Ok(ChunkOutcome::Pending { received }) => Json(ChunkUploadResponse {
            success: true,
            message: format!("Chunk {} of {} received", form.chunk_number, form.total_chunks),
            file_name: form.file_name,
            received,
            total_chunks: form.total_chunks,
            complete: false,
            duplicate: false,
            version: None,
            checksum: None,
        })
        .into_response(),
        Ok(ChunkOutcome::Duplicate { record }) => Json(ChunkUploadResponse {
            success: true,
            message: UP_TO_DATE_MESSAGE.to_owned(),
            file_name: form.file_name,
            received: form.total_chunks,
            total_chunks: form.total_chunks,
            complete: true,
            duplicate: true,
            version: Some(record.version),
            checksum: Some(record.checksum),
        })
        .into_response(),
        Ok(ChunkOutcome::Completed { record }) => Json(ChunkUploadResponse {
            success: true,
            message: "File assembled".to_owned(),
            file_name: form.file_name,
            received: form.total_chunks,
            total_chunks: form.total_chunks,
            complete: true,
            duplicate: false,
            version: Some(record.version),
            checksum: Some(record.checksum),
        })
        .into_response(),
        Err(error) => storage_error(error),
    }
}

pub(crate) async fn download_current(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    match state.stores().content.get(&name, None).await {
        Ok(blob) => blob_response(blob),
        Err(error) => storage_error(error),
    }
}

pub(crate) async fn download_version(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, u64)>,
) -> Response {
    match state.stores().content.get(&name, Some(version)).await {
        Ok(blob) => blob_response(blob),
        Err(error) => storage_error(error),
    }
}

pub(crate) async fn list_versions(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    let mut versions: Vec<VersionRecord> = match state.stores().metadata.get_all_versions(&name).await
    {
        Ok(versions) => versions,
        Err(error) => return storage_error(error),
    };
    if versions.is_empty() {
        return error_response(StatusCode::NOT_FOUND, &format!("file {name} not found"));
    }
    versions.reverse();
    Json(VersionListResponse {
        success: true,
        file_name: name,
        versions,
    })
    .into_response()
}

pub(crate) async fn restore_version(
    State(state): State<ApiState>,
    Path((name, version)): Path<(String, u64)>,
    Json(request): Json<RestoreRequest>,
) -> Response {
    if request.client_id.is_empty() {
        return HttpFailure::bad_request("client_id is required").into_response();
    }

    let stores = state.stores();
    let blob = match stores.content.get(&name, Some(version)).await {
        Ok(blob) => blob,
        Err(error) => return storage_error(error),
    };

    let restored = commit_version(
        &stores.content,
        &stores.metadata,
        NewVersion {
            file_name: &name,
            blob: &blob,
            client_id: &request.client_id,
            last_modified: chrono::Utc::now().timestamp_millis(),
            file_id: None,
            restored_from: Some(version),
            conflicted_with: None,
        },
    )
    .await;

    match restored {
        Ok(record) => Json(upload_response(
            &record,
            &format!("Restored version {version} as version {}", record.version),
            false,
            None,
        ))
        .into_response(),
        Err(error) => storage_error(error),
    }
}

pub(crate) async fn rename_file(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Response {
    if let Err(error) = validate_file_name(&request.new_name) {
        return HttpFailure::bad_request(error.to_string()).into_response();
    }

    let stores = state.stores();
    if let Err(error) = stores.content.rename(&name, &request.new_name).await {
        return storage_error(error);
    }
    match stores.metadata.rename(&name, &request.new_name).await {
        Ok(rewritten) => Json(SimpleResponse {
            success: true,
            message: format!("Renamed {name} to {} ({rewritten} versions)", request.new_name),
        })
        .into_response(),
        Err(error) => storage_error(error),
    }
}

/// Removes the current blob only; version history stays queryable and the
/// name disappears from listings.
pub(crate) async fn delete_file(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    match state.stores().content.delete(&name, None, false).await {
        Ok(()) => Json(SimpleResponse {
            success: true,
            message: format!("Deleted {name}"),
        })
        .into_response(),
        Err(error) => storage_error(error),
    }
}

fn upload_response(
    record: &VersionRecord,
    message: &str,
    duplicate: bool,
    conflict_id: Option<String>,
) -> UploadResponse {
    UploadResponse {
        success: true,
        message: message.to_owned(),
        file_id: record.file_id.clone(),
        file_name: record.file_name.clone(),
        version: record.version,
        checksum: record.checksum.clone(),
        size: record.size,
        duplicate,
        conflict_id,
    }
}

fn blob_response(blob: Vec<u8>) -> Response {
    let mut response = blob.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response
}

async fn parse_safe_upload(mut multipart: Multipart) -> Result<SafeUploadForm, HttpFailure> {
    let mut file_name = None;
    let mut client_id = None;
    let mut last_modified = None;
    let mut bytes = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };
        match name.as_str() {
            "file" => bytes = Some(field_bytes(field).await?),
            "file_name" => file_name = Some(field_text(field).await?),
            "client_id" => client_id = Some(field_text(field).await?),
            "last_modified" => last_modified = Some(parse_millis(&field_text(field).await?)?),
            _ => drain_field(field).await?,
        }
    }

    let form = SafeUploadForm {
        file_name: require(file_name, "file_name")?,
        client_id: require(client_id, "client_id")?,
        last_modified: require(last_modified, "last_modified")?,
        bytes: require(bytes, "file")?,
    };
    validate_file_name(&form.file_name)
        .map_err(|error| HttpFailure::bad_request(error.to_string()))?;
    Ok(form)
}

async fn parse_chunk_upload(mut multipart: Multipart) -> Result<ChunkForm, HttpFailure> {
    let mut file_id = None;
    let mut chunk_number = None;
    let mut total_chunks = None;
    let mut file_name = None;
    let mut client_id = None;
    let mut last_modified = None;
    let mut bytes = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };
        match name.as_str() {
            "chunk" => bytes = Some(field_bytes(field).await?),
            "file_id" => file_id = Some(field_text(field).await?),
            "chunk_number" => chunk_number = Some(parse_count(&field_text(field).await?, &name)?),
            "total_chunks" => total_chunks = Some(parse_count(&field_text(field).await?, &name)?),
            "file_name" => file_name = Some(field_text(field).await?),
            "client_id" => client_id = Some(field_text(field).await?),
            "last_modified" => last_modified = Some(parse_millis(&field_text(field).await?)?),
            _ => drain_field(field).await?,
        }
    }

    let form = ChunkForm {
        file_id: require(file_id, "file_id")?,
        chunk_number: require(chunk_number, "chunk_number")?,
        total_chunks: require(total_chunks, "total_chunks")?,
        file_name: require(file_name, "file_name")?,
        client_id: require(client_id, "client_id")?,
        last_modified: require(last_modified, "last_modified")?,
        bytes: require(bytes, "chunk")?,
    };
    validate_file_name(&form.file_name)
        .map_err(|error| HttpFailure::bad_request(error.to_string()))?;
    Ok(form)
}

async fn next_field(
    multipart: &mut Multipart,
) -> Result<Option<axum::extract::multipart::Field<'_>>, HttpFailure> {
    multipart
        .next_field()
        .await
        .map_err(|_| HttpFailure::bad_request("malformed multipart body"))
}

async fn field_bytes(field: axum::extract::multipart::Field<'_>) -> Result<Bytes, HttpFailure> {
    field
        .bytes()
        .await
        .map_err(|_| HttpFailure::bad_request("unreadable multipart field"))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, HttpFailure> {
    field
        .text()
        .await
        .map_err(|_| HttpFailure::bad_request("unreadable multipart field"))
}

async fn drain_field(field: axum::extract::multipart::Field<'_>) -> Result<(), HttpFailure> {
    field
        .bytes()
        .await
        .map_err(|_| HttpFailure::bad_request("unreadable multipart field"))?;
    Ok(())
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, HttpFailure> {
    value.ok_or_else(|| HttpFailure::bad_request(format!("missing required field {field}")))
}

fn parse_millis(raw: &str) -> Result<i64, HttpFailure> {
    raw.parse::<i64>()
        .map_err(|_| HttpFailure::bad_request("last_modified must be epoch milliseconds"))
}

fn parse_count(raw: &str, field: &str) -> Result<u32, HttpFailure> {
    raw.parse::<u32>()
        .map_err(|_| HttpFailure::bad_request(format!("{field} must be a positive integer")))
}
