//! HTTP handlers for file upload and download.
//! Bodies are streamed in both directions; storage concerns live in
//! `FileService`.

use crate::{
    auth::middleware::AuthSubject,
    errors::AppError,
    models::file::FileRecord,
    services::file_service::{NewFile, StoredBlob},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Multipart, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::io;

/// RFC 5987 `attr-char`: everything else in `filename*` is percent-encoded.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(rename = "isPublic")]
    pub is_public: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetFileQuery {
    pub id: Option<String>,
}

/// `POST /UploadFile`: multipart upload of a single `file` part.
///
/// Visibility comes from an `isPublic` form field, in any position, or from
/// the `isPublic` query parameter; it defaults to private. The file is
/// streamed to storage as soon as its part arrives and recorded once the
/// whole form has been read. Responds with the new object id as plain text.
pub async fn upload_file(
    State(state): State<AppState>,
    AuthSubject(subject): AuthSubject,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut form = UploadForm {
        is_public: match query.is_public.as_deref() {
            Some(value) => parse_flag(value)?,
            None => false,
        },
        file: None,
    };

    if let Err(err) = read_upload_form(&state, &mut multipart, &mut form).await {
        if let Some(file) = form.file.take() {
            state.files.discard(file.blob).await;
        }
        return Err(err);
    }

    let Some(file) = form.file else {
        return Err(AppError::bad_request("multipart body has no `file` part"));
    };
    let new_file = NewFile {
        owner_id: subject.id,
        file_name: file.file_name,
        content_type: file.content_type,
        is_public: form.is_public,
    };
    let object_id = state.files.record(file.blob, new_file).await?;
    Ok(object_id)
}

struct UploadForm {
    is_public: bool,
    file: Option<UploadedPart>,
}

struct UploadedPart {
    blob: StoredBlob,
    file_name: String,
    content_type: String,
}

/// Read every part of the form. The first `file` part goes straight to
/// storage; further `file` parts and unknown fields are skipped.
async fn read_upload_form(
    state: &AppState,
    multipart: &mut Multipart,
    form: &mut UploadForm,
) -> Result<(), AppError> {
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("isPublic") => {
                form.is_public = parse_flag(&field.text().await?)?;
            }
            Some("file") if form.file.is_none() => {
                let file_name = field.file_name().map(base_name).unwrap_or_default();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let body = field.map(|chunk| chunk.map_err(io::Error::other));
                let blob = state.files.store_blob(body).await?;
                form.file = Some(UploadedPart {
                    blob,
                    file_name,
                    content_type,
                });
            }
            other => tracing::debug!("ignoring multipart field {:?}", other),
        }
    }
    Ok(())
}

/// `POST /GetFile?id=<objectId>`: stream a file back as an attachment.
pub async fn get_file(
    State(state): State<AppState>,
    AuthSubject(subject): AuthSubject,
    Query(query): Query<GetFileQuery>,
) -> Result<Response, AppError> {
    let Some(id) = query.id.filter(|id| !id.is_empty()) else {
        return Err(AppError::bad_request("missing `id` query parameter"));
    };

    let download = state.files.download(&id, &subject).await?;

    let mut response = Response::new(Body::from_stream(download.body));
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &download.record);
    Ok(response)
}

/// `true` or `false`, case-insensitive.
fn parse_flag(value: &str) -> Result<bool, AppError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(AppError::bad_request(format!(
            "isPublic must be true or false, got `{}`",
            value
        )))
    }
}

/// Some clients send a full local path as the filename.
fn base_name(file_name: &str) -> String {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .to_string()
}

fn set_file_headers(headers: &mut HeaderMap, record: &FileRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(record.size_bytes.max(0)),
    );

    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&record.file_name),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", record.etag)) {
        headers.insert(header::ETAG, value);
    }

    let last_modified = record
        .created_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// `attachment` disposition keeping the original filename.
///
/// The quoted `filename` is an ASCII fallback; non-ASCII names are also sent
/// as an RFC 5987 `filename*`.
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    let mut value = format!("attachment; filename=\"{}\"", fallback);
    if !file_name.is_ascii() {
        value.push_str(&format!(
            "; filename*=UTF-8''{}",
            utf8_percent_encode(file_name, ATTR_CHAR)
        ));
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
