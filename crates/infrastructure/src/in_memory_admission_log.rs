//! In-memory admission audit log used by tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use replygate_application::{AccountUsage, AdmissionLogEntry, AdmissionLogStore, AdmissionStatus};
use replygate_core::{AccountId, AppResult};

/// In-memory implementation of the admission log port.
#[derive(Default)]
pub struct InMemoryAdmissionLog {
    entries: Mutex<Vec<AdmissionLogEntry>>,
}

impl InMemoryAdmissionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all entries, for test assertions.
    pub async fn entries(&self) -> Vec<AdmissionLogEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AdmissionLogStore for InMemoryAdmissionLog {
    async fn append(&self, entry: AdmissionLogEntry) -> AppResult<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn top_accounts(&self, limit: usize) -> AppResult<Vec<AccountUsage>> {
        let entries = self.entries.lock().await;
        let mut totals: HashMap<AccountId, i64> = HashMap::new();
        for entry in entries
            .iter()
            .filter(|entry| entry.status == AdmissionStatus::Success)
        {
            *totals.entry(entry.account_id.clone()).or_default() += 1;
        }

        let mut usage: Vec<AccountUsage> = totals
            .into_iter()
            .map(|(account_id, total_calls)| AccountUsage {
                account_id,
                total_calls,
            })
            .collect();
        usage.sort_by(|left, right| right.total_calls.cmp(&left.total_calls));
        usage.truncate(limit);
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use replygate_application::{AdmissionLogEntry, AdmissionLogStore, AdmissionStatus};
    use replygate_core::{AccountId, OwnerId};
    use replygate_domain::ActionKind;

    use super::InMemoryAdmissionLog;

    fn entry(account: &str, status: AdmissionStatus) -> AdmissionLogEntry {
        AdmissionLogEntry {
            account_id: AccountId::new(account).unwrap_or_else(|_| unreachable!()),
            owner_id: OwnerId::new("owner-1").unwrap_or_else(|_| unreachable!()),
            action: ActionKind::CommentReply,
            logged_at: Utc::now(),
            remaining_calls: 10,
            status,
            delay_ms: None,
        }
    }

    #[tokio::test]
    async fn top_accounts_counts_only_admitted_calls() {
        let log = InMemoryAdmissionLog::new();
        for _ in 0..3 {
            log.append(entry("acct-busy", AdmissionStatus::Success))
                .await
                .ok();
        }
        log.append(entry("acct-quiet", AdmissionStatus::Success))
            .await
            .ok();
        log.append(entry("acct-quiet", AdmissionStatus::RateLimited))
            .await
            .ok();
        log.append(entry("acct-quiet", AdmissionStatus::Queued))
            .await
            .ok();

        let top = log.top_accounts(10).await.unwrap_or_default();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].account_id.as_str(), "acct-busy");
        assert_eq!(top[0].total_calls, 3);
        assert_eq!(top[1].total_calls, 1);
    }
}
