use anyhow::{bail, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::{path::Path, thread, time::Duration};

use crate::models::{EndpointConfig, Message as ChatMessage};

const DEFAULT_DB_FILE: &str = "custom-summary.db";
const KEY_API_URL: &str = "summary_api_url";
const KEY_API_KEY: &str = "summary_api_key";

#[derive(Debug, Clone)]
pub struct ChatListItem {
    pub id: i64,
    pub title: String,
    pub has_summary: bool,
}

/**
 * \brief 带主键的消息结构。
 */
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /** \brief 消息行主键。 */
    pub id: i64,
    /** \brief 消息角色。 */
    pub role: String,
    /** \brief 消息正文。 */
    pub content: String,
}

/**
 * \brief 自定义总结设置（API URL 与 API Key，未设置时为空串）。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySettings {
    pub api_url: String,
    pub api_key: String,
}

impl SummarySettings {
    /**
     * \brief 转换为端点配置，空 Key 视为无凭据。
     */
    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig::new(self.api_url.clone(), Some(self.api_key.clone()))
    }
}

/**
 * \brief 数据库文件路径：优先读取 CUSTOM_SUMMARY_DB，否则使用本地目录下的 custom-summary.db。
 */
pub fn default_db_path() -> String {
    std::env::var("CUSTOM_SUMMARY_DB").unwrap_or_else(|_| DEFAULT_DB_FILE.to_string())
}

/**
 * \brief 打开默认数据库文件。
 */
pub fn open_default_db() -> Result<Connection> {
    open_db(default_db_path())
}

/**
 * \brief 打开指定路径的数据库文件。
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            summary TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL REFERENCES chats(id),
            role TEXT NOT NULL,
            content TEXT NOT NULL
        );
        "#,
        )
    })?;

    ensure_chat_summary_column(conn)?;
    Ok(())
}

fn ensure_chat_summary_column(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(chats)")?;
    let mut rows = stmt.query([])?;
    let mut has = false;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == "summary" {
            has = true;
            break;
        }
    }
    if !has {
        retry_on_locked(|| conn.execute("ALTER TABLE chats ADD COLUMN summary TEXT", []))?;
    }
    Ok(())
}

fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key=?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(Into::into)
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set_config(conn, key, if value { "1" } else { "0" })
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    Ok(get_config(conn, key)?.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief 读取总结设置，缺失项回落为空串。
 */
pub fn get_summary_settings(conn: &Connection) -> Result<SummarySettings> {
    Ok(SummarySettings {
        api_url: get_config(conn, KEY_API_URL)?.unwrap_or_default(),
        api_key: get_config(conn, KEY_API_KEY)?.unwrap_or_default(),
    })
}

/**
 * \brief 保存总结设置，两项均去除首尾空白后写入。
 */
pub fn save_summary_settings(conn: &Connection, api_url: &str, api_key: &str) -> Result<SummarySettings> {
    let settings = SummarySettings {
        api_url: api_url.trim().to_string(),
        api_key: api_key.trim().to_string(),
    };
    set_config(conn, KEY_API_URL, &settings.api_url)?;
    set_config(conn, KEY_API_KEY, &settings.api_key)?;
    Ok(settings)
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, "telemetry_enabled", false)
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, "telemetry_enabled", enabled)
}

/**
 * \brief 创建会话。
 */
pub fn create_chat(conn: &Connection, title: &str) -> Result<i64> {
    retry_on_locked(|| conn.execute("INSERT INTO chats (title) VALUES (?1)", params![title]))?;
    Ok(conn.last_insert_rowid())
}

pub fn chat_exists(conn: &Connection, chat_id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM chats WHERE id=?1", params![chat_id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/**
 * \brief 列出全部会话，新建的在前。
 */
pub fn list_chats(conn: &Connection) -> Result<Vec<ChatListItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, COALESCE(summary, '') <> '' FROM chats ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ChatListItem {
                id: row.get(0)?,
                title: row.get(1)?,
                has_summary: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 删除指定会话及其消息。
 */
pub fn delete_chat(conn: &Connection, chat_id: i64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    retry_on_locked(|| tx.execute("DELETE FROM messages WHERE chat_id=?1", params![chat_id]))?;
    retry_on_locked(|| tx.execute("DELETE FROM chats WHERE id=?1", params![chat_id]))?;
    tx.commit()?;
    Ok(())
}

/**
 * \brief 插入一条消息。
 */
pub fn insert_message(conn: &Connection, chat_id: i64, role: &str, content: &str) -> Result<i64> {
    if !chat_exists(conn, chat_id)? {
        bail!("chat id {} not found", chat_id);
    }
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO messages (chat_id, role, content) VALUES (?1, ?2, ?3)",
            params![chat_id, role, content],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/**
 * \brief 读取指定会话的全部消息，按写入顺序。
 */
pub fn load_messages(conn: &Connection, chat_id: i64) -> Result<Vec<ChatMessage>> {
    let mut stmt =
        conn.prepare("SELECT role, content FROM messages WHERE chat_id=?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![chat_id], |row| {
            Ok(ChatMessage {
                role: row.get(0)?,
                content: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 读取带主键的消息数组，用于前端展示。
 */
pub fn load_messages_with_meta(conn: &Connection, chat_id: i64) -> Result<Vec<StoredMessage>> {
    let mut stmt =
        conn.prepare("SELECT id, role, content FROM messages WHERE chat_id=?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![chat_id], |row| {
            Ok(StoredMessage {
                id: row.get(0)?,
                role: row.get(1)?,
                content: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 读取会话当前总结，空串视为没有总结。
 */
pub fn get_chat_summary(conn: &Connection, chat_id: i64) -> Result<Option<String>> {
    let summary: Option<Option<String>> = conn
        .query_row(
            "SELECT summary FROM chats WHERE id=?1",
            params![chat_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(summary.flatten().filter(|s| !s.is_empty()))
}

/**
 * \brief 覆盖会话总结。
 */
pub fn set_chat_summary(conn: &Connection, chat_id: i64, summary: &str) -> Result<()> {
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE chats SET summary=?1 WHERE id=?2",
            params![summary, chat_id],
        )
    })?;
    if rows == 0 {
        bail!("chat id {} not found", chat_id);
    }
    Ok(())
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并退避重试，最多尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
