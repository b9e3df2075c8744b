use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SummaryError;

/**
 * \brief 单条对话消息，对总结服务而言是不透明的记录，原样转发。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationTurn(pub Value);

impl ConversationTurn {
    /**
     * \brief 由角色与正文构造 `{"role", "content"}` 形式的消息。
     */
    pub fn new(role: &str, content: &str) -> Self {
        Self(json!({ "role": role, "content": content }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for ConversationTurn {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<&Message> for ConversationTurn {
    fn from(message: &Message) -> Self {
        Self::new(&message.role, &message.content)
    }
}

/**
 * \brief 总结服务端点配置，由调用方按次传入。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /** \brief 总结服务地址，为空视为未配置 */
    pub url: String,
    /** \brief 可选凭据，同时以 Bearer 与 X-API-Key 两种方式发送 */
    pub credential: Option<String>,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, credential: Option<String>) -> Self {
        Self {
            url: url.into(),
            credential: credential.filter(|c| !c.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/**
 * \brief 发往总结服务的请求体。
 */
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest<'a> {
    /** \brief 有序的对话消息 */
    pub messages: &'a [ConversationTurn],
    /** \brief 已有总结，用于增量总结 */
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_summary: Option<&'a str>,
    /** \brief 凭据（存在时才写入） */
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<&'a str>,
}

/**
 * \brief 总结结果：成功为文本，失败为类型化错误。
 */
pub type SummaryResult = Result<String, SummaryError>;

/**
 * \brief 消息结构，与 OpenAI Chat 消息格式对齐。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    /** \brief 内容 */
    pub content: String,
}
