//! Validated pipeline trigger intake.

use super::{AllowedTriggers, PipelineDomainError};
use serde::{Deserialize, Serialize};

/// Kind of change being requested, selecting the branch naming prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Planned improvement branched from the development branch.
    Feature,
    /// Urgent correction branched from the production branch.
    Hotfix,
}

impl ChangeKind {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Hotfix => "hotfix",
        }
    }
}

impl TryFrom<&str> for ChangeKind {
    type Error = PipelineDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "feature" => Ok(Self::Feature),
            "hotfix" => Ok(Self::Hotfix),
            _ => Err(PipelineDomainError::UnknownChangeKind(value.to_owned())),
        }
    }
}

/// A validated request to run the change pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTrigger {
    intent: String,
    requested_by: String,
    channel: Option<String>,
    kind: ChangeKind,
}

impl TaskTrigger {
    /// Creates a feature trigger with the required fields.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::EmptyIntent`] or
    /// [`PipelineDomainError::EmptyRequester`] when either value is empty
    /// after trimming.
    pub fn new(
        intent: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Result<Self, PipelineDomainError> {
        let intent = normalize_required(intent.into(), PipelineDomainError::EmptyIntent)?;
        let requested_by =
            normalize_required(requested_by.into(), PipelineDomainError::EmptyRequester)?;
        Ok(Self {
            intent,
            requested_by,
            channel: None,
            kind: ChangeKind::Feature,
        })
    }

    /// Sets the conversation channel the trigger arrived on.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Sets the change kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: ChangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the change intent.
    #[must_use]
    pub fn intent(&self) -> &str {
        &self.intent
    }

    /// Returns the requester identity.
    #[must_use]
    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }

    /// Returns the originating channel, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Returns the change kind.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Enforces the configured trigger scope.
    ///
    /// `Owner` scope admits only the configured owner identity and fails
    /// closed when no owner is configured.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::TriggerNotAuthorized`] when the
    /// requester falls outside the allowed scope.
    pub fn authorize(
        &self,
        allowed: AllowedTriggers,
        owner: Option<&str>,
    ) -> Result<(), PipelineDomainError> {
        let permitted = match allowed {
            AllowedTriggers::All => true,
            AllowedTriggers::None => false,
            AllowedTriggers::Owner => owner.is_some_and(|name| name == self.requested_by),
        };

        if permitted {
            Ok(())
        } else {
            Err(PipelineDomainError::TriggerNotAuthorized {
                requested_by: self.requested_by.clone(),
            })
        }
    }
}

fn normalize_required(
    raw: String,
    empty_error: PipelineDomainError,
) -> Result<String, PipelineDomainError> {
    let normalized = raw.trim();
    if normalized.is_empty() {
        return Err(empty_error);
    }
    Ok(normalized.to_owned())
}
