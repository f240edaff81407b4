use std::path::PathBuf;

use kunai_core::config::AccountingConfig;
use kunai_core::types::CalendarUserAddress;
use tokio::io::AsyncWriteExt;

use crate::error::ServiceResult;

/// Which log a record goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountingKind {
    Itip,
    ItipFreeBusy,
}

impl AccountingKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Itip => "iTIP",
            Self::ItipFreeBusy => "iTIP-VFREEBUSY",
        }
    }
}

/// Append-only audit trail of scheduling messages, one directory per
/// organizer.
#[derive(Debug, Clone)]
pub struct Accounting {
    directory: PathBuf,
    principals: Vec<String>,
}

impl Accounting {
    /// `None` when accounting is disabled.
    #[must_use]
    pub fn from_config(config: &AccountingConfig) -> Option<Self> {
        config.enabled.then(|| Self {
            directory: config.directory.clone(),
            principals: config.principals.clone(),
        })
    }

    #[must_use]
    pub fn is_enabled_for(&self, principal_uid: &str) -> bool {
        self.principals.is_empty() || self.principals.iter().any(|p| p == principal_uid)
    }

    /// Appends one record to `{directory}/{principal}/{kind}.log`.
    ///
    /// ## Errors
    /// Returns an error if the log cannot be written.
    #[tracing::instrument(skip(self, recipients, calendar), fields(kind = kind.as_str()))]
    pub async fn record(
        &self,
        kind: AccountingKind,
        principal_uid: &str,
        originator: &CalendarUserAddress,
        recipients: &[CalendarUserAddress],
        method: &str,
        calendar: &str,
    ) -> ServiceResult<()> {
        if !self.is_enabled_for(principal_uid) {
            return Ok(());
        }

        let dir = self.directory.join(principal_uid);
        tokio::fs::create_dir_all(&dir).await?;

        let entry = format_record(originator, recipients, method, calendar);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{}.log", kind.as_str())))
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn format_record(
    originator: &CalendarUserAddress,
    recipients: &[CalendarUserAddress],
    method: &str,
    calendar: &str,
) -> String {
    let mut entry = format!(
        "{}\nOriginator: {originator}\nRecipients:\n",
        chrono::Utc::now().to_rfc3339()
    );
    for recipient in recipients {
        entry.push_str("    ");
        entry.push_str(recipient.as_str());
        entry.push('\n');
    }
    entry.push_str("Method:");
    entry.push_str(method);
    entry.push_str("\n\n");
    entry.push_str(calendar);
    if !calendar.ends_with('\n') {
        entry.push('\n');
    }
    entry
}
