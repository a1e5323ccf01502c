//! HTTP interface of the service.
//!
//! `GET /` identifies the API and `POST /verify-signature` takes a PDF as
//! the `file` part of a multipart form. Uploads are checked here, before
//! anything reaches the verification pipeline.

use std::{convert::Infallible, sync::Arc};

use bytes::{Buf, BufMut};
use futures_util::TryStreamExt;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use warp::{
    http::StatusCode,
    multipart::{FormData, Part},
    reject::MethodNotAllowed,
    reply::Response,
    Filter, Rejection, Reply,
};

use crate::{verdict::DocumentVerdict, Dispatcher};

/// Largest accepted PDF, in bytes.
pub const MAX_UPLOAD_SIZE: usize = 15 * 1024 * 1024;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Reasons to refuse an upload without looking inside it.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UploadRejection {
    #[error("No file uploaded")]
    Missing,
    #[error("Only PDF files are allowed")]
    NotPdfName,
    #[error(
        "File size ({size} bytes) exceeds maximum allowed size ({} bytes)",
        MAX_UPLOAD_SIZE
    )]
    TooLarge { size: usize },
    #[error("File is not a valid PDF format")]
    NotPdfContent,
}

/// Checks, in order, the file name, the size and the magic bytes of an
/// upload of `size` bytes starting with `bytes`.
pub fn check_upload(
    filename: Option<&str>,
    size: usize,
    bytes: &[u8],
) -> Result<(), UploadRejection> {
    let has_pdf_name = filename.is_some_and(|name| name.to_ascii_lowercase().ends_with(".pdf"));
    if !has_pdf_name {
        return Err(UploadRejection::NotPdfName);
    }
    if size > MAX_UPLOAD_SIZE {
        return Err(UploadRejection::TooLarge { size });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(UploadRejection::NotPdfContent);
    }
    Ok(())
}

/// All the routes of the service, with rejections turned into JSON replies.
pub fn routes(
    dispatcher: Arc<Dispatcher>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    index_route()
        .or(verify_route(dispatcher))
        .recover(handle_rejection)
}

fn index_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "message": "PDF Signature Verification API" })))
}

fn verify_route(
    dispatcher: Arc<Dispatcher>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("verify-signature")
        .and(warp::post())
        // The size is enforced while reading, so chunked uploads without a
        // Content-Length are accepted.
        .and(warp::multipart::form().max_length(None))
        .and(with_dispatcher(dispatcher))
        .and_then(handle_verify)
}

fn with_dispatcher(
    dispatcher: Arc<Dispatcher>,
) -> impl Filter<Extract = (Arc<Dispatcher>,), Error = Infallible> + Clone {
    warp::any().map(move || dispatcher.clone())
}

struct Upload {
    filename: Option<String>,
    /// Every byte received, even past the ones kept in `bytes`.
    size: usize,
    bytes: Vec<u8>,
}

async fn handle_verify(
    form: FormData,
    dispatcher: Arc<Dispatcher>,
) -> Result<Response, Infallible> {
    let upload = match read_upload(form).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return Ok(reject_upload(None, UploadRejection::Missing)),
        Err(e) => {
            log::error!("failed to read upload: {e}");
            let verdict =
                DocumentVerdict::failure(format!("Failed to process PDF signature: {e}"));
            return Ok(json_reply(&verdict, StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    if let Err(rejection) = check_upload(upload.filename.as_deref(), upload.size, &upload.bytes) {
        return Ok(reject_upload(upload.filename.as_deref(), rejection));
    }

    let filename = upload.filename.unwrap_or_default();
    log::debug!("verifying {filename:?} ({} bytes)", upload.bytes.len());
    let verdict = dispatcher.submit(upload.bytes).await;
    match &verdict.error {
        Some(error) => log::info!("{filename:?}: {error}"),
        None => log::info!(
            "{filename:?}: {} signature(s), {} valid, {} trusted",
            verdict.signature_count,
            verdict.signatures.iter().filter(|s| s.valid).count(),
            verdict.signatures.iter().filter(|s| s.is_trusted_cert).count(),
        ),
    }

    Ok(json_reply(&verdict, StatusCode::OK))
}

/// Reads the `file` part of the form, ignoring any other part.
async fn read_upload(form: FormData) -> Result<Option<Upload>, warp::Error> {
    futures_util::pin_mut!(form);
    while let Some(part) = form.try_next().await? {
        if part.name() == "file" {
            let filename = part.filename().map(str::to_owned);
            let (size, bytes) = read_part(part).await?;
            return Ok(Some(Upload {
                filename,
                size,
                bytes,
            }));
        }
    }
    Ok(None)
}

/// Reads a part to the end, keeping its bytes only while they fit in the
/// upload limit.
async fn read_part(mut part: Part) -> Result<(usize, Vec<u8>), warp::Error> {
    let mut size = 0;
    let mut bytes = Vec::new();
    while let Some(chunk) = part.data().await {
        let chunk = chunk?;
        size += chunk.remaining();
        if size <= MAX_UPLOAD_SIZE {
            bytes.put(chunk);
        }
    }
    Ok((size, bytes))
}

fn reject_upload(filename: Option<&str>, rejection: UploadRejection) -> Response {
    log::warn!("rejected upload {filename:?}: {rejection}");
    json_reply(
        &DocumentVerdict::failure(rejection.to_string()),
        StatusCode::BAD_REQUEST,
    )
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    if rejection.is_not_found() {
        return Ok(json_reply(
            &json!({ "detail": "Not Found" }),
            StatusCode::NOT_FOUND,
        ));
    }
    if rejection.find::<MethodNotAllowed>().is_some() {
        return Ok(json_reply(
            &json!({ "detail": "Method Not Allowed" }),
            StatusCode::METHOD_NOT_ALLOWED,
        ));
    }
    // Anything else is a request that did not carry a usable form.
    log::warn!("rejected request: {rejection:?}");
    Ok(reject_upload(None, UploadRejection::Missing))
}
