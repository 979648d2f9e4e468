//! Risk classification and the automatic-approval gate.

use super::PipelineDomainError;
use serde::{Deserialize, Serialize};

/// Risk classification assigned to a change plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Localized change with no structural impact.
    Low,
    /// Change with moderate blast radius.
    Medium,
    /// Change touching critical behaviour or wide surface area.
    High,
}

impl RiskLevel {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl TryFrom<&str> for RiskLevel {
    type Error = PipelineDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(PipelineDomainError::UnknownRiskLevel(value.to_owned())),
        }
    }
}

/// Highest risk level that may proceed without human approval.
///
/// The ceiling is ordered `None < Low < Medium`; there is deliberately no
/// ceiling that admits [`RiskLevel::High`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCeiling {
    /// Every plan requires human approval.
    None,
    /// Only low-risk plans are auto-approved.
    Low,
    /// Low- and medium-risk plans are auto-approved.
    Medium,
}

impl RiskCeiling {
    /// Returns whether a plan of the given risk clears this ceiling.
    #[must_use]
    pub const fn admits(self, risk: RiskLevel) -> bool {
        match self {
            Self::None => false,
            Self::Low => matches!(risk, RiskLevel::Low),
            Self::Medium => matches!(risk, RiskLevel::Low | RiskLevel::Medium),
        }
    }

    /// Applies the risk gate to a plan's risk level.
    #[must_use]
    pub const fn gate(self, risk: RiskLevel) -> ApprovalRequirement {
        if self.admits(risk) {
            ApprovalRequirement::AutoApprove
        } else {
            ApprovalRequirement::RequireHuman
        }
    }

    /// Returns the canonical configuration representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
        }
    }
}

impl TryFrom<&str> for RiskCeiling {
    type Error = PipelineDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            _ => Err(PipelineDomainError::UnknownRiskCeiling(value.to_owned())),
        }
    }
}

/// Outcome of applying the risk gate to a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalRequirement {
    /// The plan proceeds directly to development.
    AutoApprove,
    /// The plan must wait for a human decision.
    RequireHuman,
}
