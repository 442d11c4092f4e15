//! 上传入口：无文件时返回上传页面，有文件时逐个交给摄取流水线。

use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Stage;
use crate::form::UploadForm;
use crate::frontend::upload_page;
use crate::http::wants_json;
use crate::ingest::{IngestOutcome, Ingestor};

/// 每个分片的处理结果，按到达顺序排列。
#[derive(Debug, Serialize)]
pub struct UploadReport {
    files: Vec<FileReport>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FileReport {
    #[serde(rename_all = "camelCase")]
    Stored {
        field: String,
        original_name: String,
        stored_name: String,
        checksum: String,
        size: u64,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        field: String,
        original_name: String,
        stage: Stage,
        error: String,
    },
}

impl From<IngestOutcome> for FileReport {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome.result {
            Ok(stored) => FileReport::Stored {
                field: outcome.field,
                original_name: outcome.original_name,
                stored_name: stored.file_name,
                checksum: stored.checksum.to_hex(),
                size: stored.size,
            },
            Err(err) => FileReport::Failed {
                field: outcome.field,
                original_name: outcome.original_name,
                stage: err.stage,
                error: err.source.to_string(),
            },
        }
    }
}

impl UploadReport {
    pub fn stored_count(&self) -> usize {
        self.files
            .iter()
            .filter(|file| matches!(file, FileReport::Stored { .. }))
            .count()
    }
}

impl From<Vec<IngestOutcome>> for UploadReport {
    fn from(outcomes: Vec<IngestOutcome>) -> Self {
        Self {
            files: outcomes.into_iter().map(FileReport::from).collect(),
        }
    }
}

/// 处理任意方法的请求。
///
/// 解析失败的 multipart 请求按“没有文件”处理并返回页面；请求体超限返回 413。
/// 上传结果总是 200，只有 `Accept: application/json` 时才在响应体中给出逐文件结果。
pub async fn handle_upload(
    Extension(config): Extension<Arc<Config>>,
    Extension(ingestor): Extension<Arc<Ingestor>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let form = match multipart {
        Ok(multipart) => match UploadForm::from_multipart(multipart, config.memory_limit).await {
            Ok(form) => form,
            Err(err) if err.is_too_large() => {
                warn!(error = %err, "upload rejected");
                return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
            }
            Err(err) => {
                warn!(error = %err, "failed to parse multipart form");
                UploadForm::default()
            }
        },
        Err(rejection) => {
            debug!(reason = %rejection.body_text(), "request carries no multipart form");
            UploadForm::default()
        }
    };

    if form.is_empty() {
        return upload_page();
    }

    let outcomes = ingestor.ingest_all(&form).await;
    let report = UploadReport::from(outcomes);
    info!(
        parts = form.len(),
        stored = report.stored_count(),
        "upload request finished"
    );

    if wants_json(&headers) {
        Json(report).into_response()
    } else {
        StatusCode::OK.into_response()
    }
}
