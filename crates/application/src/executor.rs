use async_trait::async_trait;
use serde_json::Value;

use replygate_core::AppResult;
use replygate_domain::ReplyAction;

/// Execution capability supplied by the host.
///
/// Performs the actual third-party platform call. The core neither knows nor
/// cares how; it only runs this after admission has been granted and maps
/// errors onto the owning queue item.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Executes one action and returns the platform response payload.
    async fn execute(&self, action: &ReplyAction) -> AppResult<Value>;
}
