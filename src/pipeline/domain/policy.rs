//! Immutable pipeline policy snapshot.
//!
//! The policy is read once at process start and passed explicitly to the
//! services that consume it; nothing in the crate performs ad-hoc
//! environment lookups after construction.

use super::{
    ChangeKind, DeployStrategy, Environment, IterationLimits, ProtectedPaths, RiskCeiling, TaskId,
};
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// Who may trigger the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowedTriggers {
    /// Only the configured owner identity.
    Owner,
    /// Any authenticated requester.
    All,
    /// Nobody; the pipeline is disabled.
    None,
}

impl AllowedTriggers {
    /// Returns the canonical configuration representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::All => "all",
            Self::None => "none",
        }
    }
}

/// Error raised when a policy value is malformed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid value '{value}' for {key}: {reason}")]
pub struct PolicyError {
    /// Configuration key that failed validation.
    pub key: &'static str,
    /// Offending raw value.
    pub value: String,
    /// Why the value was rejected.
    pub reason: String,
}

impl PolicyError {
    fn new(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Branch naming and merge configuration for the pipeline's git flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitNaming {
    develop_branch: String,
    production_branch: String,
    feature_prefix: String,
    hotfix_prefix: String,
}

impl GitNaming {
    /// Returns the integration branch new work merges into.
    #[must_use]
    pub fn develop_branch(&self) -> &str {
        &self.develop_branch
    }

    /// Returns the branch deployed to production.
    #[must_use]
    pub fn production_branch(&self) -> &str {
        &self.production_branch
    }

    /// Returns the base branch for the given change kind.
    #[must_use]
    pub fn base_branch(&self, kind: ChangeKind) -> &str {
        match kind {
            ChangeKind::Feature => &self.develop_branch,
            ChangeKind::Hotfix => &self.production_branch,
        }
    }

    /// Derives the working branch name for a task.
    ///
    /// The intent is slugged to lowercase ASCII and suffixed with the tail
    /// of the task identifier so concurrent tasks with similar intents get
    /// distinct branches.
    #[must_use]
    pub fn branch_for(&self, kind: ChangeKind, intent: &str, id: TaskId) -> String {
        let prefix = match kind {
            ChangeKind::Feature => &self.feature_prefix,
            ChangeKind::Hotfix => &self.hotfix_prefix,
        };
        let id_text = id.to_string();
        let fragment: String = id_text
            .chars()
            .skip(id_text.chars().count().saturating_sub(6))
            .collect::<String>()
            .to_ascii_lowercase();
        format!("{prefix}{}-{fragment}", slug_intent(intent))
    }

    fn set_develop_branch(&mut self, value: String) -> Result<(), PolicyError> {
        self.develop_branch = required_branch("GANTRY_DEVELOP_BRANCH", value)?;
        Ok(())
    }

    fn set_production_branch(&mut self, value: String) -> Result<(), PolicyError> {
        self.production_branch = required_branch("GANTRY_PRODUCTION_BRANCH", value)?;
        Ok(())
    }
}

impl Default for GitNaming {
    fn default() -> Self {
        Self {
            develop_branch: "develop".to_owned(),
            production_branch: "main".to_owned(),
            feature_prefix: "feature/".to_owned(),
            hotfix_prefix: "hotfix/".to_owned(),
        }
    }
}

/// Immutable policy governing every pipeline decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePolicy {
    allowed_triggers: AllowedTriggers,
    owner: Option<String>,
    auto_approve_risk: RiskCeiling,
    max_dev_iterations: u32,
    max_ci_retries: u32,
    staging_observation_minutes: u32,
    production_observation_minutes: u32,
    observation_poll_seconds: u32,
    error_rate_threshold: f64,
    deploy_strategy: DeployStrategy,
    rollback_migrations: bool,
    protected_paths: ProtectedPaths,
    git: GitNaming,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            allowed_triggers: AllowedTriggers::Owner,
            owner: None,
            auto_approve_risk: RiskCeiling::Low,
            max_dev_iterations: 10,
            max_ci_retries: 2,
            staging_observation_minutes: 5,
            production_observation_minutes: 15,
            observation_poll_seconds: 30,
            error_rate_threshold: 5.0,
            deploy_strategy: DeployStrategy::GitPull,
            rollback_migrations: true,
            protected_paths: ProtectedPaths::default(),
            git: GitNaming::default(),
        }
    }
}

impl PipelinePolicy {
    /// Builds the policy from `GANTRY_*` environment variables.
    ///
    /// Unset or empty variables keep their defaults; set variables must
    /// parse, a malformed value is never silently replaced.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] naming the offending variable when a value
    /// fails to parse or validate.
    pub fn from_env() -> Result<Self, PolicyError> {
        let mut policy = Self::default();

        if let Some(value) = env_value("GANTRY_ALLOWED_TRIGGERS") {
            policy.allowed_triggers = parse_allowed_triggers("GANTRY_ALLOWED_TRIGGERS", &value)?;
        }
        policy.owner = env_value("GANTRY_OWNER");
        if let Some(value) = env_value("GANTRY_AUTO_APPROVE_RISK") {
            policy.auto_approve_risk = RiskCeiling::try_from(value.as_str()).map_err(|err| {
                PolicyError::new("GANTRY_AUTO_APPROVE_RISK", value.clone(), err.to_string())
            })?;
        }
        if let Some(value) = env_value("GANTRY_MAX_DEV_ITERATIONS") {
            policy.max_dev_iterations = parse_u32("GANTRY_MAX_DEV_ITERATIONS", &value, 1)?;
        }
        if let Some(value) = env_value("GANTRY_MAX_CI_RETRIES") {
            policy.max_ci_retries = parse_u32("GANTRY_MAX_CI_RETRIES", &value, 0)?;
        }
        if let Some(value) = env_value("GANTRY_STAGING_OBSERVE_MINUTES") {
            policy.staging_observation_minutes =
                parse_u32("GANTRY_STAGING_OBSERVE_MINUTES", &value, 0)?;
        }
        if let Some(value) = env_value("GANTRY_PRODUCTION_OBSERVE_MINUTES") {
            policy.production_observation_minutes =
                parse_u32("GANTRY_PRODUCTION_OBSERVE_MINUTES", &value, 0)?;
        }
        if let Some(value) = env_value("GANTRY_OBSERVE_POLL_SECONDS") {
            policy.observation_poll_seconds = parse_u32("GANTRY_OBSERVE_POLL_SECONDS", &value, 1)?;
        }
        if let Some(value) = env_value("GANTRY_ERROR_RATE_THRESHOLD") {
            policy.error_rate_threshold = parse_threshold("GANTRY_ERROR_RATE_THRESHOLD", &value)?;
        }
        if let Some(value) = env_value("GANTRY_DEPLOY_STRATEGY") {
            policy.deploy_strategy = parse_deploy_strategy("GANTRY_DEPLOY_STRATEGY", &value)?;
        }
        if let Some(value) = env_value("GANTRY_ROLLBACK_MIGRATIONS") {
            policy.rollback_migrations = parse_bool("GANTRY_ROLLBACK_MIGRATIONS", &value)?;
        }
        if let Some(value) = env_value("GANTRY_PROTECTED_PATHS") {
            policy.protected_paths = parse_protected_paths("GANTRY_PROTECTED_PATHS", &value)?;
        }
        if let Some(value) = env_value("GANTRY_DEVELOP_BRANCH") {
            policy.git.set_develop_branch(value)?;
        }
        if let Some(value) = env_value("GANTRY_PRODUCTION_BRANCH") {
            policy.git.set_production_branch(value)?;
        }

        Ok(policy)
    }

    /// Returns who may trigger the pipeline.
    #[must_use]
    pub const fn allowed_triggers(&self) -> AllowedTriggers {
        self.allowed_triggers
    }

    /// Returns the configured owner identity, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Returns the auto-approval risk ceiling.
    #[must_use]
    pub const fn auto_approve_risk(&self) -> RiskCeiling {
        self.auto_approve_risk
    }

    /// Returns the retry ceilings as a limit set.
    #[must_use]
    pub const fn limits(&self) -> IterationLimits {
        IterationLimits::new(self.max_dev_iterations, self.max_ci_retries)
    }

    /// Returns the observation window length for the environment, in
    /// minutes.
    #[must_use]
    pub const fn observation_minutes(&self, environment: Environment) -> u32 {
        match environment {
            Environment::Staging => self.staging_observation_minutes,
            Environment::Production => self.production_observation_minutes,
        }
    }

    /// Returns the cadence between metric polls, in seconds.
    #[must_use]
    pub const fn observation_poll_seconds(&self) -> u32 {
        self.observation_poll_seconds
    }

    /// Returns the error-rate percentage above which a deployment is rolled
    /// back.
    #[must_use]
    pub const fn error_rate_threshold(&self) -> f64 {
        self.error_rate_threshold
    }

    /// Returns the deployment strategy.
    #[must_use]
    pub const fn deploy_strategy(&self) -> DeployStrategy {
        self.deploy_strategy
    }

    /// Returns whether rollbacks also revert database migrations.
    #[must_use]
    pub const fn rollback_migrations(&self) -> bool {
        self.rollback_migrations
    }

    /// Returns the protected path set.
    #[must_use]
    pub const fn protected_paths(&self) -> &ProtectedPaths {
        &self.protected_paths
    }

    /// Returns the git naming configuration.
    #[must_use]
    pub const fn git(&self) -> &GitNaming {
        &self.git
    }

    /// Sets the trigger scope.
    #[must_use]
    pub const fn with_allowed_triggers(mut self, allowed: AllowedTriggers) -> Self {
        self.allowed_triggers = allowed;
        self
    }

    /// Sets the owner identity.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets the auto-approval risk ceiling.
    #[must_use]
    pub const fn with_auto_approve_risk(mut self, ceiling: RiskCeiling) -> Self {
        self.auto_approve_risk = ceiling;
        self
    }

    /// Sets the retry ceilings.
    #[must_use]
    pub const fn with_limits(mut self, max_dev_iterations: u32, max_ci_retries: u32) -> Self {
        self.max_dev_iterations = max_dev_iterations;
        self.max_ci_retries = max_ci_retries;
        self
    }

    /// Sets the observation window lengths, in minutes.
    #[must_use]
    pub const fn with_observation_minutes(mut self, staging: u32, production: u32) -> Self {
        self.staging_observation_minutes = staging;
        self.production_observation_minutes = production;
        self
    }

    /// Sets the cadence between metric polls, in seconds.
    #[must_use]
    pub const fn with_observation_poll_seconds(mut self, seconds: u32) -> Self {
        self.observation_poll_seconds = seconds;
        self
    }

    /// Sets the rollback error-rate threshold percentage.
    #[must_use]
    pub const fn with_error_rate_threshold(mut self, percent: f64) -> Self {
        self.error_rate_threshold = percent;
        self
    }

    /// Sets the deployment strategy.
    #[must_use]
    pub const fn with_deploy_strategy(mut self, strategy: DeployStrategy) -> Self {
        self.deploy_strategy = strategy;
        self
    }

    /// Sets whether rollbacks revert migrations.
    #[must_use]
    pub const fn with_rollback_migrations(mut self, revert: bool) -> Self {
        self.rollback_migrations = revert;
        self
    }

    /// Sets the protected path set.
    #[must_use]
    pub fn with_protected_paths(mut self, paths: ProtectedPaths) -> Self {
        self.protected_paths = paths;
        self
    }
}

fn env_value(key: &'static str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_allowed_triggers(key: &'static str, value: &str) -> Result<AllowedTriggers, PolicyError> {
    match value.to_ascii_lowercase().as_str() {
        "owner" => Ok(AllowedTriggers::Owner),
        "all" => Ok(AllowedTriggers::All),
        "none" => Ok(AllowedTriggers::None),
        _ => Err(PolicyError::new(
            key,
            value,
            "expected one of owner, all, none",
        )),
    }
}

fn parse_deploy_strategy(key: &'static str, value: &str) -> Result<DeployStrategy, PolicyError> {
    match value.to_ascii_lowercase().as_str() {
        "git-pull" => Ok(DeployStrategy::GitPull),
        "docker" => Ok(DeployStrategy::Docker),
        _ => Err(PolicyError::new(
            key,
            value,
            "expected one of git-pull, docker",
        )),
    }
}

fn parse_u32(key: &'static str, value: &str, minimum: u32) -> Result<u32, PolicyError> {
    let parsed = value
        .parse::<u32>()
        .map_err(|_| PolicyError::new(key, value, "expected an unsigned integer"))?;
    if parsed < minimum {
        return Err(PolicyError::new(
            key,
            value,
            format!("expected a value of at least {minimum}"),
        ));
    }
    Ok(parsed)
}

fn parse_threshold(key: &'static str, value: &str) -> Result<f64, PolicyError> {
    let parsed = value
        .parse::<f64>()
        .map_err(|_| PolicyError::new(key, value, "expected a percentage"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(PolicyError::new(
            key,
            value,
            "expected a non-negative percentage",
        ));
    }
    Ok(parsed)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, PolicyError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(PolicyError::new(key, value, "expected true or false")),
    }
}

fn parse_protected_paths(key: &'static str, value: &str) -> Result<ProtectedPaths, PolicyError> {
    let entries: Vec<&str> = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();
    ProtectedPaths::new(entries).map_err(|err| PolicyError::new(key, value, err.to_string()))
}

fn required_branch(key: &'static str, value: String) -> Result<String, PolicyError> {
    let normalized = value.trim();
    if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
        return Err(PolicyError::new(key, value, "expected a branch name"));
    }
    Ok(normalized.to_owned())
}

fn slug_intent(intent: &str) -> String {
    let mut slug = String::new();
    let mut pending_separator = false;
    for ch in intent.chars() {
        if slug.len() >= 48 {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    if slug.is_empty() {
        "change".to_owned()
    } else {
        slug
    }
}
