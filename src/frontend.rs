//! 内嵌的上传页面。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;
use tracing::error;

#[derive(RustEmbed)]
#[folder = "assets"]
/// 内嵌的页面资源。
pub struct PageAssets;

pub const UPLOAD_PAGE: &str = "index.html";

/// 返回上传页面，内容与资源文件逐字节一致。
pub fn upload_page() -> Response {
    match load_embedded_asset(UPLOAD_PAGE) {
        Some(response) => response,
        None => {
            error!(asset = UPLOAD_PAGE, "upload page asset missing");
            (StatusCode::INTERNAL_SERVER_ERROR, "upload page unavailable").into_response()
        }
    }
}

fn load_embedded_asset(path: &str) -> Option<Response> {
    let asset = PageAssets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type = if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    };
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(&content_type).ok()?);
    Some((headers, AxumBody::from(asset.data.into_owned())).into_response())
}
