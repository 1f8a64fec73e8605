// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Configuration document listing tracked repositories and pipeline
//! settings.
//!
//! Every setting has a default, so an empty document is valid and a
//! repository can also be supplied on the command line instead.

use std::{collections::BTreeSet, fs, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error, client::MAX_PAGE_SIZE, enrich::Enrichment, error, model::RepositoryRef, retry::RetryPolicy,
};

/// Root configuration document.
///
/// # Examples
///
/// ```
/// use contrib_ingest::parse_config;
///
/// let yaml = r#"
/// repositories:
///   - owner: octocat
///     repo: hello-world
/// settings:
///   checkpoint_interval: 25
/// "#;
/// let config = parse_config(yaml,).expect("valid configuration",);
/// assert_eq!(config.repositories.len(), 1);
/// assert_eq!(config.settings.checkpoint_interval, 25);
/// assert_eq!(config.settings.page_size, 100);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize,)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig
{
    /// Repositories processed by a run without an explicit `--repo`.
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry,>,

    /// Pipeline tuning.
    #[serde(default)]
    pub settings: Settings,
}

/// Tracked repository entry.
#[derive(Debug, Clone, Deserialize, Serialize,)]
#[serde(deny_unknown_fields)]
pub struct RepositoryEntry
{
    /// Account or organization owning the repository.
    #[serde(alias = "org", alias = "organization")]
    pub owner: String,

    /// Repository name.
    #[serde(alias = "repo")]
    pub repository: String,

    /// Disabled entries are kept in the document but never ingested.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool
{
    true
}

impl RepositoryEntry
{
    /// Validated reference to the repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty or malformed components.
    pub fn reference(&self,) -> Result<RepositoryRef, Error,>
    {
        RepositoryRef::new(&self.owner, &self.repository,)
    }
}

/// Pipeline settings shared by every repository of a run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize,)]
#[serde(default, deny_unknown_fields)]
pub struct Settings
{
    /// Items handled between two checkpoint writes (default: 10).
    pub checkpoint_interval:           u32,
    /// Items requested per page, `1..=100` (default: 100).
    pub page_size:                     u8,
    /// Wall-clock budget of one invocation in seconds (default: 240).
    pub time_budget_secs:              u64,
    /// Part of the budget reserved for committing and reporting (default:
    /// 20).
    pub safety_margin_secs:            u64,
    /// Share of the hourly quota kept in reserve (default: 1).
    pub rate_limit_floor_percent:      u8,
    /// Whether pull requests are enriched with their changed files
    /// (default: true).
    pub fetch_pull_request_files:      bool,
    /// Whether pull requests are enriched with their comments and reviews
    /// (default: true).
    pub fetch_pull_request_discussion: bool,
    /// Retry policy applied to every request.
    pub retry:                         RetryPolicy,
}

impl Default for Settings
{
    fn default() -> Self
    {
        Self {
            checkpoint_interval:           10,
            page_size:                     MAX_PAGE_SIZE,
            time_budget_secs:              240,
            safety_margin_secs:            20,
            rate_limit_floor_percent:      1,
            fetch_pull_request_files:      true,
            fetch_pull_request_discussion: true,
            retry:                         RetryPolicy::default(),
        }
    }
}

impl Settings
{
    /// Instant after which no new page may be requested for an invocation
    /// that started at `started_at`.
    pub fn deadline_from(&self, started_at: DateTime<Utc,>,) -> DateTime<Utc,>
    {
        let usable = self.time_budget_secs.saturating_sub(self.safety_margin_secs,).min(u64::from(u32::MAX,),);
        started_at + chrono::Duration::seconds(i64::try_from(usable,).unwrap_or(i64::from(u32::MAX,),),)
    }

    /// Pull request collections fetched for every walked item.
    pub fn enrichment(&self,) -> Enrichment
    {
        Enrichment {
            files: self.fetch_pull_request_files, discussion: self.fetch_pull_request_discussion,
        }
    }

    /// Checks the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first violated
    /// invariant.
    pub fn validate(&self,) -> Result<(), Error,>
    {
        if self.checkpoint_interval == 0 {
            return Err(Error::validation("settings.checkpoint_interval must be at least 1",),);
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size,) {
            return Err(Error::validation(format!(
                "settings.page_size must be between 1 and {MAX_PAGE_SIZE}"
            ),),);
        }
        if self.safety_margin_secs >= self.time_budget_secs {
            return Err(Error::validation(
                "settings.safety_margin_secs must be smaller than settings.time_budget_secs",
            ),);
        }
        if self.rate_limit_floor_percent > 100 {
            return Err(Error::validation("settings.rate_limit_floor_percent must not exceed 100",),);
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::validation("settings.retry.max_attempts must be at least 1",),);
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(Error::validation("settings.retry.backoff_factor must be at least 1.0",),);
        }

        Ok((),)
    }
}

impl IngestConfig
{
    /// References of the enabled repositories, in document order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed entries.
    pub fn enabled_repositories(&self,) -> Result<Vec<RepositoryRef,>, Error,>
    {
        self.repositories
            .iter()
            .filter(|entry| entry.enabled,)
            .map(RepositoryEntry::reference,)
            .collect()
    }

    fn validate(&self,) -> Result<(), Error,>
    {
        self.settings.validate()?;

        let mut seen = BTreeSet::new();
        for entry in &self.repositories {
            let reference = entry.reference()?;
            let key = reference.to_string().to_ascii_lowercase();
            if !seen.insert(key,) {
                return Err(Error::validation(format!("duplicate repository '{reference}'"),),);
            }
        }

        Ok((),)
    }
}

/// Loads and validates a configuration document from disk.
///
/// # Errors
///
/// Returns [`Error::Io`] when the file cannot be read, [`Error::Parse`] for
/// invalid YAML, and [`Error::Validation`] for violated invariants.
pub fn load_config(path: &Path,) -> Result<IngestConfig, Error,>
{
    let contents = fs::read_to_string(path,).map_err(|source| error::io_error(path, source,),)?;
    parse_config(&contents,)
}

/// Parses and validates a configuration document.
///
/// # Errors
///
/// Returns [`Error::Parse`] for invalid YAML and [`Error::Validation`] for
/// violated invariants.
pub fn parse_config(contents: &str,) -> Result<IngestConfig, Error,>
{
    let config: IngestConfig =
        if contents.trim().is_empty() { IngestConfig::default() } else { serde_yaml::from_str(contents,)? };
    config.validate()?;
    Ok(config,)
}
