//! 统一的响应写出

use crate::Error;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// 错误响应的 Content-Type（RFC 9457）
pub const PROBLEM_JSON: &str = "application/problem+json";

/// 根据错误和数据写出响应
///
/// - 没有错误：200，数据为空或 `null` 时没有响应体；
/// - 错误状态码小于 400：作为成功状态的覆盖，仍然写出数据；
/// - 错误状态码大于等于 400：写出 `application/problem+json`，忽略数据。
///
/// `sanitize` 为真时先用 [`sanitize_json`] 去掉数据中的空成员。
pub fn send_resp(err: Option<Error>, data: Option<Value>, sanitize: bool) -> Response {
    match err {
        Some(err) if err.status().as_u16() >= 400 => problem(&err),
        Some(err) => success(err.status(), data, sanitize),
        None => success(StatusCode::OK, data, sanitize),
    }
}

/// 递归去掉对象中值为 `null`、`""`、`{}` 或 `[]` 的成员
///
/// 数组元素保持原样，只清理其内部。
pub fn sanitize_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.values_mut().for_each(sanitize_json);
            map.retain(|_, v| !is_empty(v));
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_json),
        _ => {}
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn success(status: StatusCode, data: Option<Value>, sanitize: bool) -> Response {
    let data = data.filter(|v| !v.is_null());
    match data {
        Some(mut value) if status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED => {
            if sanitize {
                sanitize_json(&mut value);
            }
            (status, Json(value)).into_response()
        }
        _ => status.into_response(),
    }
}

fn problem(err: &Error) -> Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err, "request failed");
    } else {
        tracing::debug!(status = status.as_u16(), error = %err, "request rejected");
    }

    let mut body = json!({
        "title": status.canonical_reason().unwrap_or("Error"),
        "status": status.as_u16(),
    });
    if !err.message().is_empty() {
        body["detail"] = Value::String(err.message().to_string());
    }
    (status, [(header::CONTENT_TYPE, PROBLEM_JSON)], body.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(resp: Response) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_success_with_data() {
        let resp = send_resp(None, Some(json!({"id": 7})), false);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: Value = serde_json::from_slice(&body_of(resp).await).unwrap();
        assert_eq!(body, json!({"id": 7}));
    }

    #[tokio::test]
    async fn test_success_without_data() {
        for data in [None, Some(Value::Null)] {
            let resp = send_resp(None, data, false);
            assert_eq!(resp.status(), StatusCode::OK);
            assert!(body_of(resp).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_status_override_keeps_data() {
        let resp = send_resp(
            Some(Error::from_status(StatusCode::CREATED)),
            Some(json!("made")),
            false,
        );
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(body_of(resp).await, b"\"made\"");

        let resp = send_resp(
            Some(Error::from_status(StatusCode::NO_CONTENT)),
            Some(json!({"ignored": true})),
            false,
        );
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(body_of(resp).await.is_empty());
    }

    #[tokio::test]
    async fn test_error_is_problem_json() {
        let resp = send_resp(
            Some(Error::not_found("no such order")),
            Some(json!({"ignored": true})),
            false,
        );
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), PROBLEM_JSON);
        let body: Value = serde_json::from_slice(&body_of(resp).await).unwrap();
        assert_eq!(
            body,
            json!({"title": "Not Found", "status": 404, "detail": "no such order"})
        );

        let resp = send_resp(Some(StatusCode::BAD_GATEWAY.into()), None, false);
        let body: Value = serde_json::from_slice(&body_of(resp).await).unwrap();
        assert_eq!(body, json!({"title": "Bad Gateway", "status": 502}));
    }

    #[test]
    fn test_sanitize_json() {
        let mut value = json!({
            "name": "tea",
            "note": "",
            "tags": [],
            "meta": {"owner": null, "extra": {}},
            "count": 0,
            "flag": false,
            "items": [{"sku": "a", "memo": ""}, null],
        });
        sanitize_json(&mut value);
        assert_eq!(
            value,
            json!({
                "name": "tea",
                "count": 0,
                "flag": false,
                "items": [{"sku": "a"}, null],
            })
        );
    }

    #[tokio::test]
    async fn test_sanitize_applied_on_send() {
        let resp = send_resp(None, Some(json!({"a": 1, "b": null})), true);
        let body: Value = serde_json::from_slice(&body_of(resp).await).unwrap();
        assert_eq!(body, json!({"a": 1}));
    }
}
