use std::convert::Infallible;

use anyhow::{anyhow, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, get_service, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::services::ServeDir;

use crate::host::{self, SqliteConversation, SqliteSettings, SummaryOutcome};
use crate::{db, error::SummaryError, summary::SummaryClient, telemetry};

/**
 * \brief 服务共享状态：数据库路径与复用的总结客户端。
 */
#[derive(Debug, Clone)]
pub struct AppState {
    pub db_path: String,
    pub client: SummaryClient,
}

impl AppState {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            client: SummaryClient::new(),
        }
    }

    fn open(&self) -> Result<rusqlite::Connection, (StatusCode, String)> {
        db::open_db(&self.db_path).map_err(internal_err)
    }
}

/**
 * \brief 构建 API 路由（不含静态资源）。
 */
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/settings", get(get_settings).post(save_settings))
        .route("/api/chats", get(list_chats).post(create_chat))
        .route("/api/chats/{id}", delete(remove_chat))
        .route(
            "/api/chats/{id}/messages",
            get(get_chat_messages).post(append_message),
        )
        .route("/api/chats/{id}/summary", get(get_summary))
        .route("/api/chats/{id}/summarize", post(summarize_chat))
        .route("/api/chats/{id}/summarize/sse", get(summarize_sse))
        .route("/api/health", get(health_check))
        .with_state(state)
}

/**
 * \brief 启动本地 HTTP 服务，提供静态前端与 API。
 * \param addr 监听地址，如 "127.0.0.1:5180"
 */
pub async fn run(addr: &str) -> Result<()> {
    let ui_root =
        std::env::var("CUSTOM_SUMMARY_UI_DIR").unwrap_or_else(|_| "ui/dist".to_string());
    let fallback_root =
        std::env::var("CUSTOM_SUMMARY_UI_FALLBACK").unwrap_or_else(|_| "web".to_string());

    let static_handler = if std::path::Path::new(&ui_root).exists() {
        ServeDir::new(ui_root)
    } else {
        ServeDir::new(fallback_root)
    }
    .append_index_html_on_directories(true);

    let state = AppState::new(db::default_db_path());
    {
        let conn = state.open().map_err(|(_, e)| anyhow!(e))?;
        db::migrate(&conn)?;
        telemetry::set_enabled(db::get_telemetry_enabled(&conn).unwrap_or(false));
    }

    let app = api_router(state).fallback_service(get_service(static_handler));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    telemetry::log_event("server", &format!("listening addr={}", addr));
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize, Debug)]
struct SettingsState {
    api_url: String,
    api_key: String,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
struct SettingsInput {
    /** \brief 总结服务地址 */
    api_url: String,
    /** \brief 总结服务密钥，可为空 */
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    telemetry_enabled: Option<bool>,
}

#[derive(Serialize, Debug)]
struct ChatItemDto {
    id: i64,
    title: String,
    has_summary: bool,
}

#[derive(Serialize, Debug)]
struct ChatListResponse {
    chats: Vec<ChatItemDto>,
}

#[derive(Deserialize, Debug)]
struct CreateChatRequest {
    title: String,
}

#[derive(Serialize, Debug)]
struct ChatMessageDto {
    id: i64,
    role: String,
    content: String,
}

#[derive(Serialize, Debug)]
struct ChatMessagesResponse {
    chat_id: i64,
    messages: Vec<ChatMessageDto>,
}

#[derive(Deserialize, Debug)]
struct AppendMessageRequest {
    /** \brief 消息角色：system/user/assistant */
    role: String,
    /** \brief 消息正文 */
    content: String,
}

#[derive(Serialize, Debug)]
struct ChatSummaryResponse {
    chat_id: i64,
    summary: Option<String>,
}

/**
 * \brief 总结接口的统一返回体。
 */
#[derive(Serialize, Debug, Default)]
struct SummarizeResponse {
    ok: bool,
    chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

#[derive(Deserialize, Debug)]
struct SseQuery {
    /** \brief 开启调试（默认 false），将推送 log 事件 */
    debug: Option<bool>,
}

fn settings_state(conn: &rusqlite::Connection) -> Result<SettingsState> {
    let settings = db::get_summary_settings(conn)?;
    Ok(SettingsState {
        api_url: settings.api_url,
        api_key: settings.api_key,
        telemetry_enabled: db::get_telemetry_enabled(conn)?,
    })
}

fn chat_list(conn: &rusqlite::Connection) -> Result<ChatListResponse> {
    let chats = db::list_chats(conn)?
        .into_iter()
        .map(|c| ChatItemDto {
            id: c.id,
            title: c.title,
            has_summary: c.has_summary,
        })
        .collect();
    Ok(ChatListResponse { chats })
}

fn ensure_chat(conn: &rusqlite::Connection, id: i64) -> Result<(), (StatusCode, String)> {
    if db::chat_exists(conn, id).map_err(internal_err)? {
        Ok(())
    } else {
        Err((StatusCode::NOT_FOUND, format!("会话 {} 不存在", id)))
    }
}

/**
 * \brief 获取总结设置。
 */
async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<SettingsState>, (StatusCode, String)> {
    let conn = state.open()?;
    Ok(Json(settings_state(&conn).map_err(internal_err)?))
}

/**
 * \brief 保存总结设置。
 */
async fn save_settings(
    State(state): State<AppState>,
    Json(input): Json<SettingsInput>,
) -> Result<Json<SettingsState>, (StatusCode, String)> {
    let conn = state.open()?;
    db::save_summary_settings(&conn, &input.api_url, &input.api_key).map_err(internal_err)?;
    if let Some(enabled) = input.telemetry_enabled {
        db::set_telemetry_enabled(&conn, enabled).map_err(internal_err)?;
        telemetry::set_enabled(enabled);
    }
    telemetry::log_event("server.settings", "设置已保存");
    Ok(Json(settings_state(&conn).map_err(internal_err)?))
}

/**
 * \brief 列出会话。
 */
async fn list_chats(
    State(state): State<AppState>,
) -> Result<Json<ChatListResponse>, (StatusCode, String)> {
    let conn = state.open()?;
    Ok(Json(chat_list(&conn).map_err(internal_err)?))
}

async fn create_chat(
    State(state): State<AppState>,
    Json(payload): Json<CreateChatRequest>,
) -> Result<Json<ChatItemDto>, (StatusCode, String)> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "会话标题不能为空".to_string()));
    }
    let conn = state.open()?;
    let id = db::create_chat(&conn, title).map_err(internal_err)?;
    telemetry::log_event("server.chat", &format!("create chat id={}", id));
    Ok(Json(ChatItemDto {
        id,
        title: title.to_string(),
        has_summary: false,
    }))
}

/**
 * \brief 删除指定会话。
 */
async fn remove_chat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ChatListResponse>, (StatusCode, String)> {
    let conn = state.open()?;
    db::delete_chat(&conn, id).map_err(internal_err)?;
    telemetry::log_event("server.chat", &format!("delete chat id={}", id));
    Ok(Json(chat_list(&conn).map_err(internal_err)?))
}

/**
 * \brief 获取指定会话的消息。
 */
async fn get_chat_messages(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ChatMessagesResponse>, (StatusCode, String)> {
    let conn = state.open()?;
    ensure_chat(&conn, id)?;
    let messages = db::load_messages_with_meta(&conn, id)
        .map_err(internal_err)?
        .into_iter()
        .map(|m| ChatMessageDto {
            id: m.id,
            role: m.role,
            content: m.content,
        })
        .collect();
    Ok(Json(ChatMessagesResponse {
        chat_id: id,
        messages,
    }))
}

async fn append_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<AppendMessageRequest>,
) -> Result<Json<ChatMessageDto>, (StatusCode, String)> {
    let conn = state.open()?;
    ensure_chat(&conn, id)?;
    let message_id =
        db::insert_message(&conn, id, &payload.role, &payload.content).map_err(internal_err)?;
    Ok(Json(ChatMessageDto {
        id: message_id,
        role: payload.role,
        content: payload.content,
    }))
}

/**
 * \brief 读取会话当前总结。
 */
async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ChatSummaryResponse>, (StatusCode, String)> {
    let conn = state.open()?;
    ensure_chat(&conn, id)?;
    let summary = db::get_chat_summary(&conn, id).map_err(internal_err)?;
    Ok(Json(ChatSummaryResponse { chat_id: id, summary }))
}

/**
 * \brief 为指定会话生成总结并写回：POST /api/chats/{id}/summarize
 */
async fn summarize_chat(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<SummarizeResponse>), (StatusCode, String)> {
    {
        let conn = state.open()?;
        ensure_chat(&conn, id)?;
    }
    let settings = SqliteSettings::new(state.db_path.clone());
    let conversation = SqliteConversation::new(state.db_path.clone(), id);
    let outcome = host::generate_summary(&state.client, &settings, &conversation, &conversation)
        .await
        .map_err(internal_err)?;
    Ok(outcome_response(id, outcome))
}

fn outcome_response(chat_id: i64, outcome: SummaryOutcome) -> (StatusCode, Json<SummarizeResponse>) {
    let mut body = SummarizeResponse {
        chat_id,
        ..Default::default()
    };
    let status = match outcome {
        SummaryOutcome::Updated(text) => {
            body.ok = true;
            body.summary = Some(text);
            StatusCode::OK
        }
        SummaryOutcome::Unchanged => {
            body.warning = Some("总结服务返回了空内容，未更新总结".to_string());
            StatusCode::OK
        }
        SummaryOutcome::Failed(err) => {
            let status = match &err {
                SummaryError::NotConfigured => StatusCode::BAD_REQUEST,
                SummaryError::EmptyInput => StatusCode::OK,
                SummaryError::EndpointError { status, .. } => {
                    body.upstream_status = Some(*status);
                    StatusCode::BAD_GATEWAY
                }
                SummaryError::TransportError { .. } => StatusCode::BAD_GATEWAY,
            };
            if err.is_warning() {
                body.warning = Some(err.to_string());
            } else {
                body.error = Some(err.to_string());
            }
            status
        }
    };
    (status, Json(body))
}

/**
 * \brief 总结 SSE 接口：GET /api/chats/{id}/summarize/sse?debug=true
 */
async fn summarize_sse(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<SseQuery>,
) -> Result<
    Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>,
    (StatusCode, String),
> {
    {
        let conn = state.open()?;
        ensure_chat(&conn, id)?;
    }

    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();
    let _ = tx.send(Ok(Event::default()
        .event("meta")
        .data(serde_json::json!({ "chat_id": id }).to_string())));

    let debug = q.debug.unwrap_or(false);
    tokio::spawn(async move {
        let settings = SqliteSettings::new(state.db_path.clone());
        let conversation = SqliteConversation::new(state.db_path.clone(), id);
        if debug {
            let _ = tx.send(Ok(Event::default()
                .event("log")
                .data(format!("request -> chat_id={}", id))));
        }

        match host::generate_summary(&state.client, &settings, &conversation, &conversation).await
        {
            Ok(SummaryOutcome::Updated(text)) => {
                let _ = tx.send(Ok(Event::default().event("summary").data(text)));
            }
            Ok(SummaryOutcome::Unchanged) => {
                let _ = tx.send(Ok(Event::default()
                    .event("warning")
                    .data("总结服务返回了空内容，未更新总结")));
            }
            Ok(SummaryOutcome::Failed(err)) => {
                let event = if err.is_warning() { "warning" } else { "error" };
                let _ = tx.send(Ok(Event::default().event(event).data(err.to_string())));
            }
            Err(e) => {
                telemetry::log_error("server.summary", &format!("storage failed: {}", e));
                let _ = tx.send(Ok(Event::default().event("error").data(e.to_string())));
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new()))
}

/**
 * \brief 健康检查：返回是否已配置总结服务。
 */
async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let conn = state.open()?;
    let settings = db::get_summary_settings(&conn).map_err(internal_err)?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "configured": settings.endpoint().is_configured(),
    })))
}

fn internal_err<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
