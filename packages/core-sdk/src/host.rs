use anyhow::Result;

use crate::error::SummaryError;
use crate::models::{ConversationTurn, EndpointConfig};
use crate::summary::SummaryClient;
use crate::{db, telemetry};

/**
 * \brief 设置来源：提供端点地址与凭据。
 */
pub trait SettingsReader: Send + Sync {
    fn endpoint_config(&self) -> Result<EndpointConfig>;
}

/**
 * \brief 会话读取能力：有序消息与当前总结。
 */
pub trait ConversationReader: Send + Sync {
    fn turns(&self) -> Result<Vec<ConversationTurn>>;
    fn current_summary(&self) -> Result<Option<String>>;
}

/**
 * \brief 总结写回能力。
 */
pub trait SummaryWriter: Send + Sync {
    fn write_summary(&self, summary: &str) -> Result<()>;
}

impl SettingsReader for EndpointConfig {
    fn endpoint_config(&self) -> Result<EndpointConfig> {
        Ok(self.clone())
    }
}

/**
 * \brief 基于本地 SQLite 的设置读取器，每次调用独立打开连接。
 */
#[derive(Debug, Clone)]
pub struct SqliteSettings {
    pub db_path: String,
}

impl SqliteSettings {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

impl SettingsReader for SqliteSettings {
    fn endpoint_config(&self) -> Result<EndpointConfig> {
        let conn = db::open_db(&self.db_path)?;
        Ok(db::get_summary_settings(&conn)?.endpoint())
    }
}

/**
 * \brief 基于本地 SQLite 的单个会话，同时实现读取与写回。
 */
#[derive(Debug, Clone)]
pub struct SqliteConversation {
    pub db_path: String,
    pub chat_id: i64,
}

impl SqliteConversation {
    pub fn new(db_path: impl Into<String>, chat_id: i64) -> Self {
        Self {
            db_path: db_path.into(),
            chat_id,
        }
    }
}

impl ConversationReader for SqliteConversation {
    fn turns(&self) -> Result<Vec<ConversationTurn>> {
        let conn = db::open_db(&self.db_path)?;
        let messages = db::load_messages(&conn, self.chat_id)?;
        Ok(messages.iter().map(ConversationTurn::from).collect())
    }

    fn current_summary(&self) -> Result<Option<String>> {
        let conn = db::open_db(&self.db_path)?;
        db::get_chat_summary(&conn, self.chat_id)
    }
}

impl SummaryWriter for SqliteConversation {
    fn write_summary(&self, summary: &str) -> Result<()> {
        let conn = db::open_db(&self.db_path)?;
        db::set_chat_summary(&conn, self.chat_id, summary)
    }
}

/**
 * \brief 一次“生成总结”操作的结果。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /** \brief 已写回新总结 */
    Updated(String),
    /** \brief 服务返回空文本，未写回 */
    Unchanged,
    /** \brief 总结调用失败，未写回 */
    Failed(SummaryError),
}

/**
 * \brief 读取会话与设置，调用总结服务并写回结果。
 * \details 存储层错误通过 Err 返回；总结服务的失败收敛为 `SummaryOutcome::Failed`。
 */
pub async fn generate_summary<S, C, W>(
    client: &SummaryClient,
    settings: &S,
    conversation: &C,
    writer: &W,
) -> Result<SummaryOutcome>
where
    S: SettingsReader + ?Sized,
    C: ConversationReader + ?Sized,
    W: SummaryWriter + ?Sized,
{
    let config = settings.endpoint_config()?;
    let turns = conversation.turns()?;
    let current = conversation
        .current_summary()?
        .filter(|s| !s.is_empty());

    telemetry::log_event(
        "summary",
        &format!(
            "request turns={} has_prior={} has_credential={}",
            turns.len(),
            current.is_some(),
            config.credential.is_some()
        ),
    );

    match client.summarize(&turns, current.as_deref(), &config).await {
        Ok(text) if text.is_empty() => {
            telemetry::log_warn("summary", "endpoint returned empty summary");
            Ok(SummaryOutcome::Unchanged)
        }
        Ok(text) => {
            writer.write_summary(&text)?;
            telemetry::log_event("summary", &format!("updated summary_len={}", text.len()));
            Ok(SummaryOutcome::Updated(text))
        }
        Err(err) => {
            if err.is_warning() {
                telemetry::log_warn("summary", &err.to_string());
            } else {
                telemetry::log_error("summary", &err.to_string());
            }
            Ok(SummaryOutcome::Failed(err))
        }
    }
}
