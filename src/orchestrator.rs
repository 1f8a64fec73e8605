// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Ingestion state machine tying the client, walks, and checkpoint store
//! together.
//!
//! One [`Ingestor::run`] is one time-boxed invocation. It never returns an
//! error: the outcome is always an [`IngestionResult`] whose status tells the
//! scheduler whether the repository is finished, needs another invocation,
//! or is broken.
//!
//! Positional progress is committed at three points: every
//! `checkpoint_interval` items inside the walk, at the last fully processed
//! item when the invocation suspends, and at the start sentinel when the
//! walk reaches the oldest item. A fatal failure (rejected credential,
//! missing repository, failed checkpoint write) commits nothing further, but
//! the items handled before it stay in the record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    Error,
    checkpoint::{CheckpointStore, START_POSITION},
    client::{ApiClient, Resource},
    clock::Clock,
    config::Settings,
    enrich::WalkStop,
    full::{WalkOptions, fetch_from_checkpoint},
    incremental::fetch_since,
    model::{
        Contributor, Issue, PullRequest, RepositoryMetadata, RepositoryRef, WorkItem, decode_contributor,
        decode_repository_metadata,
    },
    special_files::{SpecialFiles, parse_special_files},
    transport::Transport,
};

/// Window refreshed by an incremental run without an explicit `since`.
pub const DEFAULT_INCREMENTAL_WINDOW_DAYS: i64 = 7;

/// Fetch strategy selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,)]
#[serde(rename_all = "lowercase")]
pub enum Mode
{
    /// Timestamp-bounded refresh of recently updated items.
    Incremental,
    /// Checkpoint-bounded walk through the complete history.
    Full,
}

impl fmt::Display for Mode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result
    {
        f.write_str(match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
        },)
    }
}

/// Request to ingest one repository.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct Trigger
{
    pub mode:       Mode,
    pub repository: RepositoryRef,
    /// Lower bound for incremental mode, ignored by full mode.
    pub since:      Option<DateTime<Utc,>,>,
}

/// States of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
pub enum Phase
{
    Start,
    DetermineMode,
    Incremental,
    FullResume,
    PersistCheckpoint,
    Done,
    Suspended,
    Failed,
}

/// Terminal status reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,)]
#[serde(rename_all = "lowercase")]
pub enum Status
{
    /// All data was processed.
    Done,
    /// The invocation stopped early and can be resumed.
    Suspended,
    /// The invocation hit an unrecoverable error.
    Failed,
}

/// Per-kind counters of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize,)]
pub struct RecordCounts
{
    pub contributors:  usize,
    pub issues:        usize,
    pub pull_requests: usize,
    pub skipped:       usize,
}

/// Bookkeeping attached to every record.
#[derive(Debug, Clone, Serialize,)]
pub struct RecordMetadata
{
    pub mode:                    Mode,
    pub scraped_at:              DateTime<Utc,>,
    pub counts:                  RecordCounts,
    pub processing_time_seconds: f64,
    /// Lower bound for the next incremental run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_since:              Option<DateTime<Utc,>,>,
}

/// Data produced by one invocation for one repository.
#[derive(Debug, Clone, Serialize,)]
pub struct IngestionRecord
{
    pub repository:          RepositoryRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_metadata: Option<RepositoryMetadata,>,
    pub contributors:        Vec<Contributor,>,
    pub issues:              Vec<Issue,>,
    pub pull_requests:       Vec<PullRequest,>,
    pub special_files:       SpecialFiles,
    pub metadata:            RecordMetadata,
}

impl IngestionRecord
{
    pub(crate) fn empty(repository: RepositoryRef, mode: Mode, scraped_at: DateTime<Utc,>,) -> Self
    {
        Self {
            repository,
            repository_metadata: None,
            contributors: Vec::new(),
            issues: Vec::new(),
            pull_requests: Vec::new(),
            special_files: SpecialFiles::default(),
            metadata: RecordMetadata {
                mode,
                scraped_at,
                counts: RecordCounts::default(),
                processing_time_seconds: 0.0,
                next_since: None,
            },
        }
    }

    fn push(&mut self, item: WorkItem,)
    {
        match item {
            WorkItem::Issue(issue,) => self.issues.push(issue,),
            WorkItem::PullRequest(pull,) => self.pull_requests.push(pull,),
        }
    }

    /// Numbers of all emitted issues and pull requests, ascending.
    pub fn item_numbers(&self,) -> Vec<u64,>
    {
        let mut numbers: Vec<u64,> = self
            .issues
            .iter()
            .map(|issue| issue.number,)
            .chain(self.pull_requests.iter().map(|pull| pull.number,),)
            .collect();
        numbers.sort_unstable();
        numbers
    }
}

/// Outcome of one invocation for one repository.
#[derive(Debug, Clone, Serialize,)]
pub struct IngestionResult
{
    pub status:          Status,
    /// Issues and pull requests emitted by this invocation.
    pub items_processed: usize,
    /// Resume point after the invocation; for full mode the stored
    /// checkpoint position.
    pub last_position:   Option<u64,>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error:           Option<String,>,
    pub record:          IngestionRecord,
    #[serde(skip)]
    pub phases:          Vec<Phase,>,
}

struct Outcome
{
    status:        Status,
    last_position: Option<u64,>,
    error:         Option<Error,>,
}

impl Outcome
{
    /// Failed for fatal errors, suspended otherwise.
    fn halted(error: Error, last_position: Option<u64,>,) -> Self
    {
        let status = if error.is_fatal() { Status::Failed } else { Status::Suspended };
        Self {
            status, last_position, error: Some(error,),
        }
    }
}

/// Runs ingestion invocations against one API client and checkpoint store.
pub struct Ingestor<T, C, S,>
{
    client:   ApiClient<T, C,>,
    store:    S,
    settings: Settings,
    phases:   Vec<Phase,>,
}

impl<T, C, S,> Ingestor<T, C, S,>
where
    T: Transport,
    C: Clock,
    S: CheckpointStore,
{
    pub fn new(client: ApiClient<T, C,>, store: S, settings: Settings,) -> Self
    {
        Self {
            client, store, settings, phases: Vec::new(),
        }
    }

    pub fn client(&self,) -> &ApiClient<T, C,>
    {
        &self.client
    }

    pub fn store(&self,) -> &S
    {
        &self.store
    }

    /// Runs one invocation for `trigger`. No page is requested after
    /// `deadline`.
    pub async fn run(&mut self, trigger: &Trigger, deadline: DateTime<Utc,>,) -> IngestionResult
    {
        let started = self.client.clock().now();
        let repo = trigger.repository.clone();
        self.phases.clear();
        self.enter(&repo, Phase::Start,);
        self.client.set_deadline(Some(deadline,),);

        let mut record = IngestionRecord::empty(repo.clone(), trigger.mode, started,);
        self.enter(&repo, Phase::DetermineMode,);
        let outcome = match trigger.mode {
            Mode::Full => self.run_full(&repo, deadline, &mut record,).await,
            Mode::Incremental => self.run_incremental(&repo, trigger.since, deadline, &mut record,).await,
        };
        let outcome = outcome.unwrap_or_else(|error| Outcome {
            status:        Status::Failed,
            last_position: match trigger.mode {
                Mode::Full => self.stored_position(&repo,),
                Mode::Incremental => None,
            },
            error:         Some(error,),
        },);

        let terminal = match outcome.status {
            Status::Done => Phase::Done,
            Status::Suspended => Phase::Suspended,
            Status::Failed => Phase::Failed,
        };
        self.enter(&repo, terminal,);

        let finished = self.client.clock().now();
        record.metadata.processing_time_seconds = (finished - started).num_milliseconds() as f64 / 1000.0;
        record.metadata.counts.contributors = record.contributors.len();
        record.metadata.counts.issues = record.issues.len();
        record.metadata.counts.pull_requests = record.pull_requests.len();
        let items_processed = record.issues.len() + record.pull_requests.len();

        match &outcome.error {
            Some(error,) if outcome.status == Status::Failed => {
                error!(repository = %repo, "ingestion failed: {}", error);
            }
            Some(error,) => warn!(repository = %repo, "ingestion suspended: {}", error),
            None => {}
        }
        info!(
            repository = %repo,
            mode = %trigger.mode,
            status = ?outcome.status,
            items = items_processed,
            last_position = ?outcome.last_position,
            "invocation finished"
        );

        IngestionResult {
            status: outcome.status,
            items_processed,
            last_position: outcome.last_position,
            error: outcome.error.map(|error| error.to_display_string(),),
            record,
            phases: self.phases.clone(),
        }
    }

    /// Runs `triggers` in order while `deadline` allows. Triggers reached
    /// after the deadline are reported as suspended without any request.
    pub async fn run_all(&mut self, triggers: &[Trigger], deadline: DateTime<Utc,>,) -> Vec<IngestionResult,>
    {
        let mut results = Vec::with_capacity(triggers.len(),);
        for trigger in triggers {
            let now = self.client.clock().now();
            if now >= deadline {
                info!(repository = %trigger.repository, "deadline reached before start, deferring");
                let last_position = match trigger.mode {
                    Mode::Full => self.stored_position(&trigger.repository,),
                    Mode::Incremental => None,
                };
                results.push(IngestionResult {
                    status: Status::Suspended,
                    items_processed: 0,
                    last_position,
                    error: None,
                    record: IngestionRecord::empty(trigger.repository.clone(), trigger.mode, now,),
                    phases: vec![Phase::Start, Phase::Suspended],
                },);
                continue;
            }
            results.push(self.run(trigger, deadline,).await,);
        }
        results
    }

    async fn run_full(
        &mut self,
        repo: &RepositoryRef,
        deadline: DateTime<Utc,>,
        record: &mut IngestionRecord,
    ) -> Result<Outcome, Error,>
    {
        self.enter(repo, Phase::FullResume,);
        let fresh_pass = self.store.get(repo,)?.is_none_or(|checkpoint| checkpoint.is_start(),);

        if fresh_pass && let Err(error,) = self.pass_start(repo, record,).await {
            return Ok(Outcome::halted(error, self.stored_position(repo,),),);
        }

        let options = WalkOptions {
            checkpoint_interval: self.settings.checkpoint_interval,
            enrichment: self.settings.enrichment(),
            deadline,
        };
        let pass = fetch_from_checkpoint(&self.client, &self.store, repo, options,).await?;
        record.metadata.counts.skipped += pass.skipped;
        for item in pass.items {
            record.push(item,);
        }

        let now = self.client.clock().now();
        match pass.stop {
            WalkStop::EndOfData => {
                self.enter(repo, Phase::PersistCheckpoint,);
                self.store.set(repo, START_POSITION, now,)?;
                Ok(Outcome {
                    status: Status::Done, last_position: Some(START_POSITION,), error: None,
                },)
            }
            WalkStop::Failed(error,) => Ok(Outcome {
                status:        Status::Failed,
                last_position: self.stored_position(repo,),
                error:         Some(error,),
            },),
            stop => {
                self.enter(repo, Phase::PersistCheckpoint,);
                if let Some(position,) = pass.last_position
                    && pass.committed != Some(position,)
                {
                    self.store.set(repo, position, now,)?;
                    debug!(repository = %repo, position, "resume point committed");
                }
                let error = match stop {
                    WalkStop::Interrupted(error,) => Some(error,),
                    _ => None,
                };
                Ok(Outcome {
                    status: Status::Suspended,
                    last_position: pass.last_position.or(pass.resumed_below,),
                    error,
                },)
            }
        }
    }

    async fn run_incremental(
        &mut self,
        repo: &RepositoryRef,
        since: Option<DateTime<Utc,>,>,
        deadline: DateTime<Utc,>,
        record: &mut IngestionRecord,
    ) -> Result<Outcome, Error,>
    {
        self.enter(repo, Phase::Incremental,);
        let since = since.unwrap_or_else(|| {
            self.client.clock().now() - chrono::Duration::days(DEFAULT_INCREMENTAL_WINDOW_DAYS,)
        },);
        record.repository_metadata = match self.repository_metadata(repo,).await {
            Ok(metadata,) => metadata,
            Err(error,) => return Ok(Outcome::halted(error, None,),),
        };

        let pass = fetch_since(&self.client, repo, since, self.settings.enrichment(), deadline,).await;
        let last_position = pass.last_position();
        record.metadata.counts.skipped += pass.skipped;
        record.metadata.next_since = Some(pass.next_since,);
        for item in pass.items {
            record.push(item,);
        }

        Ok(match pass.stop {
            WalkStop::EndOfData => Outcome {
                status: Status::Done, last_position, error: None,
            },
            WalkStop::Deadline => Outcome {
                status: Status::Suspended, last_position, error: None,
            },
            WalkStop::Interrupted(error,) | WalkStop::Failed(error,) => Outcome::halted(error, last_position,),
        },)
    }

    /// Fetches the data recomputed once per full pass.
    async fn pass_start(&self, repo: &RepositoryRef, record: &mut IngestionRecord,) -> Result<(), Error,>
    {
        record.repository_metadata = self.repository_metadata(repo,).await?;
        let values = self.client.fetch_all(repo, Resource::Contributors,).await?;
        for value in &values {
            match decode_contributor(value,) {
                Ok(Some(contributor,),) => record.contributors.push(contributor,),
                Ok(None,) => record.metadata.counts.skipped += 1,
                Err(error,) => {
                    warn!(repository = %repo, "skipping contributor: {}", error);
                    record.metadata.counts.skipped += 1;
                }
            }
        }
        record.special_files = parse_special_files(&self.client, repo,).await?;
        Ok((),)
    }

    /// Descriptive attributes of `repo`; an undecodable document is logged
    /// and left out of the record.
    async fn repository_metadata(&self, repo: &RepositoryRef,) -> Result<Option<RepositoryMetadata,>, Error,>
    {
        let decoded = self.client.repository(repo,).await.and_then(|value| decode_repository_metadata(&value,),);
        match decoded {
            Ok(metadata,) => Ok(Some(metadata,),),
            Err(error @ Error::MalformedResponse {
                ..
            },) => {
                warn!(repository = %repo, "skipping repository metadata: {}", error);
                Ok(None,)
            }
            Err(error,) => Err(error,),
        }
    }

    fn stored_position(&self, repo: &RepositoryRef,) -> Option<u64,>
    {
        self.store.get(repo,).ok().flatten().map(|checkpoint| checkpoint.last_processed_position,)
    }

    fn enter(&mut self, repo: &RepositoryRef, next: Phase,)
    {
        debug!(repository = %repo, from = ?self.phases.last(), to = ?next, "phase transition");
        self.phases.push(next,);
    }
}
