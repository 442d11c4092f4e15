//! 上传处理中的错误类型：按流水线阶段区分。

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use serde::Serialize;
use std::fmt;
use std::io::{self, ErrorKind};
use thiserror::Error;

/// 单个文件分片所处的处理阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Open,
    Checksum,
    Rewind,
    Create,
    Copy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Open => "open",
            Stage::Checksum => "checksum",
            Stage::Rewind => "rewind",
            Stage::Create => "create",
            Stage::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// 某个分片在指定阶段失败；只影响该分片本身。
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct IngestError {
    pub stage: Stage,
    #[source]
    pub source: io::Error,
}

impl IngestError {
    pub fn new(stage: Stage, source: io::Error) -> Self {
        Self { stage, source }
    }

    /// 目标路径已存在（排他创建失败）。
    pub fn is_collision(&self) -> bool {
        self.stage == Stage::Create && self.source.kind() == ErrorKind::AlreadyExists
    }
}

/// 解析 multipart 表单失败。
#[derive(Debug, Error)]
pub enum FormError {
    #[error("malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("failed to spool upload: {0}")]
    Spool(#[from] io::Error),
}

impl FormError {
    /// 请求体超过上限时返回 413，其余情况视为没有文件。
    pub fn is_too_large(&self) -> bool {
        match self {
            FormError::Multipart(err) => err.status() == StatusCode::PAYLOAD_TOO_LARGE,
            FormError::Spool(_) => false,
        }
    }
}
