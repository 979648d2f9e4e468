//! Versioned payloads recorded against plans and stage attempts.
//!
//! Both payload families are stored as JSON with an explicit schema
//! version. Decoding is defensive: an unknown version or shape is an
//! error, never silently coerced.

use super::{DeployStrategy, Environment, PipelineDomainError, RiskLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured output of the planning stage.
///
/// The pipeline consumes only the risk classification and the declared
/// change set; `detail` is carried verbatim for humans and audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    schema_version: u32,
    risk: RiskLevel,
    changed_paths: Vec<String>,
    summary: String,
    detail: Value,
}

impl Plan {
    /// Schema version written by this crate.
    pub const SCHEMA_VERSION: u32 = 1;

    /// Creates a plan at the current schema version.
    #[must_use]
    pub fn new(
        risk: RiskLevel,
        changed_paths: impl IntoIterator<Item = impl Into<String>>,
        summary: impl Into<String>,
        detail: Value,
    ) -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION,
            risk,
            changed_paths: changed_paths.into_iter().map(Into::into).collect(),
            summary: summary.into(),
            detail,
        }
    }

    /// Returns the schema version the plan was written at.
    #[must_use]
    pub const fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Returns the risk classification.
    #[must_use]
    pub const fn risk(&self) -> RiskLevel {
        self.risk
    }

    /// Returns the declared change set.
    #[must_use]
    pub fn changed_paths(&self) -> &[String] {
        &self.changed_paths
    }

    /// Returns the human-readable summary.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Returns the free-form plan detail.
    #[must_use]
    pub const fn detail(&self) -> &Value {
        &self.detail
    }

    /// Decodes a persisted plan payload.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::UnsupportedPlanVersion`] for a
    /// version this crate does not write and
    /// [`PipelineDomainError::MalformedPlan`] when the payload does not
    /// match the plan schema.
    pub fn decode(value: &Value) -> Result<Self, PipelineDomainError> {
        let version = value
            .get("schema_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                PipelineDomainError::MalformedPlan("missing schema_version".to_owned())
            })?;
        if version != u64::from(Self::SCHEMA_VERSION) {
            return Err(PipelineDomainError::UnsupportedPlanVersion(version));
        }
        serde_json::from_value(value.clone())
            .map_err(|err| PipelineDomainError::MalformedPlan(err.to_string()))
    }
}

/// Human decision recorded by an approval attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalChoice {
    /// The plan was approved as gated.
    Approved,
    /// The plan was rejected.
    Rejected,
    /// A protected-path block was explicitly overridden.
    Override,
}

impl ApprovalChoice {
    /// Returns the canonical representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Override => "override",
        }
    }
}

/// Compensating rollback action recorded inside an observation or deploy
/// output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// Environment that was reverted.
    pub environment: Environment,
    /// Whether database migrations were reverted with the code.
    pub migrations_reverted: bool,
}

/// Outcome payload sealed into a stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    /// Research findings for the intent.
    Research {
        /// Condensed findings handed to planning.
        summary: String,
    },
    /// Plan digest as recorded at planning time.
    Planning {
        /// Risk classification assigned by the plan.
        risk: RiskLevel,
        /// Paths the plan declared it will touch.
        changed_paths: Vec<String>,
        /// Human-readable plan summary.
        summary: String,
    },
    /// Human approval decision.
    Approval {
        /// The decision taken.
        decision: ApprovalChoice,
        /// Identity that decided.
        decided_by: String,
        /// Optional decision note or rejection reason.
        note: Option<String>,
    },
    /// Patch generation result.
    Developing {
        /// Summary of the generated change.
        diff_summary: String,
        /// Files touched by the patch.
        files_changed: Vec<String>,
    },
    /// Test suite or CI verdict.
    Checks {
        /// Whether the checks passed.
        passed: bool,
        /// Failure diagnostics, empty on a pass.
        diagnostics: String,
    },
    /// Human review verdict on the pull request.
    Review {
        /// Whether the review approved the change.
        approved: bool,
        /// Identity of the reviewer.
        reviewer: String,
    },
    /// Release action against an environment.
    Deploy {
        /// Environment released to.
        environment: Environment,
        /// Strategy used for the release.
        strategy: DeployStrategy,
        /// Host or image the release landed on.
        target: String,
        /// Commit the release carried.
        commit: String,
    },
    /// Observation window digest.
    Observation {
        /// Environment observed.
        environment: Environment,
        /// Number of metric polls performed.
        polls: u32,
        /// Highest error rate seen during the window.
        peak_error_rate_percent: f64,
        /// Whether the error threshold was breached.
        breached: bool,
        /// Compensating rollback, when the window breached.
        rollback: Option<RollbackRecord>,
    },
    /// Attempt aborted before its stage goal was settled: a crash, a
    /// cancellation, or a deploy failure compensated by rollback.
    Interrupted {
        /// Why the attempt was aborted.
        reason: String,
        /// Compensating rollback run as part of the abort, if any.
        rollback: Option<RollbackRecord>,
    },
}

impl StageOutput {
    /// Schema version written by this crate.
    pub const SCHEMA_VERSION: u32 = 1;

    /// Serializes the output with its schema version envelope.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::MalformedOutput`] when serialization
    /// fails.
    pub fn encode(&self) -> Result<Value, PipelineDomainError> {
        let mut value = serde_json::to_value(self)
            .map_err(|err| PipelineDomainError::MalformedOutput(err.to_string()))?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "schema_version".to_owned(),
                Value::from(Self::SCHEMA_VERSION),
            );
        }
        Ok(value)
    }

    /// Decodes a persisted output envelope.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::UnsupportedOutputVersion`] for a
    /// version this crate does not write and
    /// [`PipelineDomainError::MalformedOutput`] when the payload does not
    /// match any known output kind.
    pub fn decode(value: &Value) -> Result<Self, PipelineDomainError> {
        let version = value
            .get("schema_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                PipelineDomainError::MalformedOutput("missing schema_version".to_owned())
            })?;
        if version != u64::from(Self::SCHEMA_VERSION) {
            return Err(PipelineDomainError::UnsupportedOutputVersion(version));
        }
        serde_json::from_value(value.clone())
            .map_err(|err| PipelineDomainError::MalformedOutput(err.to_string()))
    }
}
