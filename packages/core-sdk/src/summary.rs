use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::error::SummaryError;
use crate::models::{ConversationTurn, EndpointConfig, SummaryRequest, SummaryResult};

const API_KEY_HEADER: &str = "x-api-key";

/**
 * \brief 自定义总结服务客户端：一次 POST，无重试、无超时控制。
 */
#[derive(Debug, Clone, Default)]
pub struct SummaryClient {
    http: reqwest::Client,
}

impl SummaryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * \brief 复用外部构建好的 reqwest 客户端。
     */
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /**
     * \brief 发送对话与已有总结，返回服务端生成的总结文本。
     * \param turns 有序对话消息，为空时直接返回 EmptyInput
     * \param prior_summary 已有总结，原样转发
     * \param config 端点配置，url 为空时直接返回 NotConfigured
     */
    pub async fn summarize(
        &self,
        turns: &[ConversationTurn],
        prior_summary: Option<&str>,
        config: &EndpointConfig,
    ) -> SummaryResult {
        if !config.is_configured() {
            return Err(SummaryError::NotConfigured);
        }
        if turns.is_empty() {
            return Err(SummaryError::EmptyInput);
        }

        let credential = config.credential.as_deref().filter(|c| !c.is_empty());
        let body = SummaryRequest {
            messages: turns,
            current_summary: prior_summary,
            api_key: credential,
        };

        let resp = self
            .http
            .post(config.url.trim())
            .headers(build_headers(credential)?)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SummaryError::EndpointError {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let raw = resp.text().await?;
        let v: Value = serde_json::from_str(&raw)?;
        Ok(extract_summary(v))
    }
}

fn build_headers(credential: Option<&str>) -> Result<HeaderMap, SummaryError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = credential {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(key)?);
    }
    Ok(headers)
}

/**
 * \brief 兼容多种响应格式：summary 字段、text 字段、裸字符串，其余原样序列化。
 * \details 字段值为 null、false、0 或空串时视为缺失，继续尝试下一种格式。
 */
pub fn extract_summary(v: Value) -> String {
    let field = v
        .get("summary")
        .filter(|f| is_truthy(f))
        .or_else(|| v.get("text").filter(|f| is_truthy(f)));
    if let Some(field) = field {
        return value_to_text(field);
    }
    match v {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Bytes, http::StatusCode, routing::post, Router};
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    #[derive(Clone, Default)]
    struct Captured {
        hits: Arc<AtomicUsize>,
        headers: Arc<Mutex<Option<axum::http::HeaderMap>>>,
        body: Arc<Mutex<Option<Value>>>,
    }

    async fn spawn_endpoint(status: StatusCode, reply: &'static str) -> (String, Captured) {
        let captured = Captured::default();
        let state = captured.clone();
        let app = Router::new().route(
            "/summarize",
            post(move |headers: axum::http::HeaderMap, body: Bytes| {
                let state = state.clone();
                async move {
                    state.hits.fetch_add(1, Ordering::SeqCst);
                    *state.headers.lock().unwrap() = Some(headers);
                    *state.body.lock().unwrap() = serde_json::from_slice(&body).ok();
                    (status, [(CONTENT_TYPE, "application/json")], reply)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock endpoint");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{}/summarize", addr), captured)
    }

    fn turns() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::new("user", "我们明天几点出发？"),
            ConversationTurn::new("assistant", "早上八点。"),
        ]
    }

    #[tokio::test]
    async fn test_empty_url_is_not_configured() {
        let client = SummaryClient::new();
        let cfg = EndpointConfig::new("", Some("sk".to_string()));
        let err = client.summarize(&turns(), None, &cfg).await.unwrap_err();
        assert_eq!(err, SummaryError::NotConfigured);
    }

    #[tokio::test]
    async fn test_empty_turns_skip_network() {
        let (url, captured) = spawn_endpoint(StatusCode::OK, r#"{"summary":"S"}"#).await;
        let client = SummaryClient::new();
        let err = client
            .summarize(&[], Some("old"), &EndpointConfig::new(url, None))
            .await
            .unwrap_err();
        assert_eq!(err, SummaryError::EmptyInput);
        assert_eq!(captured.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_summary_field_wins() {
        let (url, captured) =
            spawn_endpoint(StatusCode::OK, r#"{"summary":"S","text":"T"}"#).await;
        let out = SummaryClient::new()
            .summarize(&turns(), None, &EndpointConfig::new(url, None))
            .await
            .expect("summary");
        assert_eq!(out, "S");
        assert_eq!(captured.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_text_field_fallback() {
        let (url, _) = spawn_endpoint(StatusCode::OK, r#"{"text":"T"}"#).await;
        let out = SummaryClient::new()
            .summarize(&turns(), None, &EndpointConfig::new(url, None))
            .await
            .expect("summary");
        assert_eq!(out, "T");
    }

    #[tokio::test]
    async fn test_bare_string_response() {
        let (url, _) = spawn_endpoint(StatusCode::OK, r#""X""#).await;
        let out = SummaryClient::new()
            .summarize(&turns(), None, &EndpointConfig::new(url, None))
            .await
            .expect("summary");
        assert_eq!(out, "X");
    }

    #[tokio::test]
    async fn test_unknown_shape_is_serialized() {
        let (url, _) = spawn_endpoint(StatusCode::OK, r#"{"foo": 1}"#).await;
        let out = SummaryClient::new()
            .summarize(&turns(), None, &EndpointConfig::new(url, None))
            .await
            .expect("summary");
        assert_eq!(out, json!({"foo": 1}).to_string());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_endpoint_error() {
        let (url, _) = spawn_endpoint(StatusCode::INTERNAL_SERVER_ERROR, r#"{"summary":"S"}"#).await;
        let err = SummaryClient::new()
            .summarize(&turns(), None, &EndpointConfig::new(url, None))
            .await
            .unwrap_err();
        match err {
            SummaryError::EndpointError { status, status_text } => {
                assert_eq!(status, 500);
                assert_eq!(status_text, "Internal Server Error");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_json_is_transport_error() {
        let (url, _) = spawn_endpoint(StatusCode::OK, "not json").await;
        let err = SummaryClient::new()
            .summarize(&turns(), None, &EndpointConfig::new(url, None))
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        let err = SummaryClient::new()
            .summarize(
                &turns(),
                None,
                &EndpointConfig::new(format!("http://{}/summarize", addr), None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SummaryError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_credential_sets_both_headers_and_body() {
        let (url, captured) = spawn_endpoint(StatusCode::OK, r#"{"summary":"S"}"#).await;
        SummaryClient::new()
            .summarize(
                &turns(),
                Some("先前的总结"),
                &EndpointConfig::new(url, Some("sk-test".to_string())),
            )
            .await
            .expect("summary");

        let headers = captured.headers.lock().unwrap().clone().expect("headers");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert_eq!(headers.get(API_KEY_HEADER).unwrap(), "sk-test");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");

        let body = captured.body.lock().unwrap().clone().expect("body");
        assert_eq!(body["messages"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(body["messages"][1]["content"], "早上八点。");
        assert_eq!(body["current_summary"], "先前的总结");
        assert_eq!(body["api_key"], "sk-test");
    }

    #[tokio::test]
    async fn test_no_credential_sends_no_auth_headers() {
        let (url, captured) = spawn_endpoint(StatusCode::OK, r#"{"summary":"S"}"#).await;
        SummaryClient::new()
            .summarize(&turns(), None, &EndpointConfig::new(url, None))
            .await
            .expect("summary");

        let headers = captured.headers.lock().unwrap().clone().expect("headers");
        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(headers.get(API_KEY_HEADER).is_none());

        let body = captured.body.lock().unwrap().clone().expect("body");
        assert!(body.get("api_key").is_none());
        assert!(body.get("current_summary").is_none());
    }

    #[test]
    fn test_falsy_fields_fall_through() {
        assert_eq!(extract_summary(json!({"summary": "", "text": "T"})), "T");
        assert_eq!(extract_summary(json!({"summary": null, "text": 0})), r#"{"summary":null,"text":0}"#);
        assert_eq!(extract_summary(json!({"summary": false})), r#"{"summary":false}"#);
        assert_eq!(extract_summary(json!({"summary": ""})), r#"{"summary":""}"#);
        assert_eq!(extract_summary(json!({"summary": 0.0, "text": true})), "true");
    }

    #[test]
    fn test_extract_non_string_summary_field() {
        assert_eq!(extract_summary(json!({"summary": ["a", "b"]})), r#"["a","b"]"#);
        assert_eq!(extract_summary(json!(42)), "42");
    }
}
