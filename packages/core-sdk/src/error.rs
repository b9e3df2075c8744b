use thiserror::Error;

/**
 * \brief 总结调用的失败分类，全部在客户端边界收敛为该枚举。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryError {
    /** \brief 未配置 API URL，不发起网络请求 */
    #[error("请先在设置中配置 API URL")]
    NotConfigured,

    /** \brief 没有可总结的消息，不发起网络请求 */
    #[error("没有可总结的消息")]
    EmptyInput,

    /** \brief 端点可达但返回了非 2xx 状态 */
    #[error("API 请求失败: {status} {status_text}")]
    EndpointError { status: u16, status_text: String },

    /** \brief 网络失败或响应无法解析 */
    #[error("总结生成失败: {message}")]
    TransportError { message: String },
}

impl SummaryError {
    /**
     * \brief 是否应以警告而非错误的形式呈现给用户。
     */
    pub fn is_warning(&self) -> bool {
        matches!(self, SummaryError::EmptyInput)
    }

    pub fn transport(message: impl std::fmt::Display) -> Self {
        SummaryError::TransportError {
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for SummaryError {
    fn from(error: reqwest::Error) -> Self {
        SummaryError::transport(error)
    }
}

impl From<reqwest::header::InvalidHeaderValue> for SummaryError {
    fn from(error: reqwest::header::InvalidHeaderValue) -> Self {
        SummaryError::transport(error)
    }
}

impl From<serde_json::Error> for SummaryError {
    fn from(error: serde_json::Error) -> Self {
        SummaryError::transport(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_empty_input_is_warning() {
        assert!(SummaryError::EmptyInput.is_warning());
        assert!(!SummaryError::NotConfigured.is_warning());
        assert!(!SummaryError::transport("boom").is_warning());
    }

    #[test]
    fn test_endpoint_error_message_carries_status() {
        let err = SummaryError::EndpointError {
            status: 503,
            status_text: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "API 请求失败: 503 Service Unavailable");
    }
}
