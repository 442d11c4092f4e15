//! Multipart form parsing into spooled file parts.

use axum::extract::Multipart;
use tracing::debug;

use crate::error::FormError;
use crate::spool::{MemoryBudget, PartContent, Spooler};

/// One uploaded file: the form field it arrived in, the client filename and its content.
#[derive(Debug)]
pub struct FilePart {
    field: String,
    file_name: String,
    content: PartContent,
}

impl FilePart {
    pub fn new(field: impl Into<String>, file_name: impl Into<String>, content: PartContent) -> Self {
        Self {
            field: field.into(),
            file_name: file_name.into(),
            content,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content(&self) -> &PartContent {
        &self.content
    }
}

/// File parts of one request, in the order they arrived.
#[derive(Debug, Default)]
pub struct UploadForm {
    parts: Vec<FilePart>,
}

impl UploadForm {
    #[cfg(test)]
    pub fn new(parts: Vec<FilePart>) -> Self {
        Self { parts }
    }

    /// Reads the whole body. Fields without a filename are drained and dropped;
    /// file content is kept in memory until `memory_limit` is used up across the
    /// request, then spilled to temp files.
    pub async fn from_multipart(
        mut multipart: Multipart,
        memory_limit: usize,
    ) -> Result<Self, FormError> {
        let mut budget = MemoryBudget::new(memory_limit);
        let mut parts = Vec::new();

        while let Some(mut field) = multipart.next_field().await? {
            let field_name = field.name().unwrap_or_default().to_owned();
            let file_name = field
                .file_name()
                .filter(|name| !name.is_empty())
                .map(str::to_owned);
            let Some(file_name) = file_name else {
                while field.chunk().await?.is_some() {}
                debug!(field = field_name, "skipped non-file form field");
                continue;
            };

            let mut spooler = Spooler::new();
            while let Some(chunk) = field.chunk().await? {
                spooler.write(&chunk, &mut budget).await?;
            }
            let content = spooler.finish().await?;
            debug!(
                field = field_name,
                file_name,
                bytes = content.len(),
                on_disk = content.is_on_disk(),
                "received file part"
            );
            parts.push(FilePart::new(field_name, file_name, content));
        }

        Ok(Self { parts })
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn parts(&self) -> &[FilePart] {
        &self.parts
    }
}
