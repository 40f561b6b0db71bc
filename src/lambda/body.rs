//! 请求体解码

use super::LambdaConfig;
use crate::Error;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use http_body_util::LengthLimitError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use validator::{Validate, ValidationErrors};

/// 可以作为请求体参数的类型
///
/// 实现了 [`Validate`] 的类型（通常是 `#[derive(Validate)]` 的结构体）自动满足，
/// 解码后执行校验。其他类型用 [`Unvalidated`] 包装。
pub trait LambdaBody: DeserializeOwned + Send + 'static {
    fn validate_body(&self) -> Result<(), ValidationErrors>;
}

impl<T> LambdaBody for T
where
    T: DeserializeOwned + Validate + Send + 'static,
{
    fn validate_body(&self) -> Result<(), ValidationErrors> {
        self.validate()
    }
}

/// 只解码、不校验的请求体
///
/// 用于 `String`、`Vec<T>`、`HashMap`、`serde_json::Value` 等没有实现 [`Validate`] 的类型：
///
/// ```no_run
/// use trace_lambda::lambda::Unvalidated;
/// use trace_lambda::Error;
///
/// async fn tag(Unvalidated(tags): Unvalidated<Vec<String>>) -> Result<usize, Error> {
///     Ok(tags.len())
/// }
///
/// let handler = trace_lambda::wrap(tag);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Unvalidated<T>(pub T);

impl<T> Unvalidated<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> LambdaBody for Unvalidated<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn validate_body(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// 读取并解码 JSON 请求体，按配置进行校验
///
/// 空请求体按 JSON `null` 解码。
pub(crate) async fn read_json<T>(req: Request, config: &LambdaConfig) -> Result<T, Error>
where
    T: LambdaBody,
{
    let result = decode(req, config).await;
    if let Err(err) = &result {
        tracing::debug!(status = err.status().as_u16(), error = %err, "rejected request body");
    }
    result
}

async fn decode<T>(req: Request, config: &LambdaConfig) -> Result<T, Error>
where
    T: LambdaBody,
{
    check_content_type(req.headers())?;

    let limit = config.body_limit();
    if content_length(req.headers()).is_some_and(|len| len > limit) {
        return Err(too_large(limit));
    }

    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|err| {
            let err = err.into_inner();
            if err.is::<LengthLimitError>() {
                too_large(limit)
            } else {
                Error::bad_request(format!("failed to read request body: {err}"))
            }
        })?;

    let data = if bytes.iter().all(u8::is_ascii_whitespace) {
        T::deserialize(serde_json::Value::Null)?
    } else {
        serde_json::from_slice(&bytes)?
    };

    if config.validate {
        data.validate_body()?;
    }
    Ok(data)
}

/// 允许没有 Content-Type，或者 `application/json` 及 `+json` 后缀的类型
fn check_content_type(headers: &HeaderMap) -> Result<(), Error> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };
    let media_type = value
        .to_str()
        .ok()
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if media_type == "application/json" || media_type.ends_with("+json") {
        Ok(())
    } else {
        Err(Error::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("unsupported content type: {media_type:?}"),
        ))
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn too_large(limit: usize) -> Error {
    Error::new(
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("request body exceeds {limit} bytes"),
    )
}
