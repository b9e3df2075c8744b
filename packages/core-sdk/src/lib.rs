pub mod db;
pub mod error;
pub mod host;
pub mod models;
pub mod server;
pub mod summary;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::db;
    pub use crate::error::SummaryError;
    pub use crate::host::{self, generate_summary, SummaryOutcome};
    pub use crate::models::{ConversationTurn, EndpointConfig};
    pub use crate::server;
    pub use crate::summary::SummaryClient;
    pub use crate::telemetry;
}
