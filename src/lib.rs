// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Resumable, rate-limit aware ingestion of GitHub repository activity.
//!
//! The library walks the contributors, issues and pull requests of a
//! repository through a budgeted API client, enriches every item with the
//! issues it references and (for pull requests) the files it changes, and
//! parses the repository's ownership map, contributing guide and package
//! manifest. Full walks persist a positional checkpoint so that a sequence of
//! short, time-boxed invocations eventually covers the whole repository.
//! Incremental walks refresh everything updated since a timestamp.
//!
//! Every network and time dependency sits behind a trait ([`Transport`],
//! [`Clock`], [`CheckpointStore`]), so the pipeline can be driven against
//! scripted responses and virtual time.

mod checkpoint;
mod client;
mod clock;
mod config;
mod enrich;
mod error;
mod full;
mod incremental;
mod links;
mod model;
mod orchestrator;
mod output;
mod rate_limit;
mod retry;
mod special_files;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use checkpoint::{
    Checkpoint, CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore, START_POSITION,
};
pub use client::{ApiClient, MAX_PAGE_SIZE, Page, Resource};
pub use clock::{Clock, SystemClock};
pub use config::{IngestConfig, RepositoryEntry, Settings, load_config, parse_config};
pub use enrich::{Enrichment, WalkStop, enrich_item};
pub use error::{Error, io_error};
pub use full::{FullPass, WalkOptions, fetch_from_checkpoint};
pub use incremental::{IncrementalPass, fetch_since};
pub use links::{extract_closing_issues, extract_linked_issues};
pub use model::{
    ChangedFile, Comment, Contributor, Issue, MAX_EXCERPT_CHARS, PullRequest, RepositoryMetadata, RepositoryRef,
    Review, WorkItem, decode_changed_file, decode_comment, decode_contributor, decode_repository_metadata,
    decode_review, decode_work_item, item_number,
};
pub use orchestrator::{
    DEFAULT_INCREMENTAL_WINDOW_DAYS, IngestionRecord, IngestionResult, Ingestor, Mode, Phase,
    RecordCounts, RecordMetadata, Status, Trigger,
};
pub use output::{record_file_name, write_record, write_records, write_results};
pub use rate_limit::{ANONYMOUS_LIMIT, AUTHENTICATED_LIMIT, RateBudget, epoch_seconds};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use special_files::{
    CONTRIBUTING_GUIDE_PATHS, ContributingGuide, MANIFEST_PATH, Manifest, OWNERSHIP_MAP_PATHS,
    OwnershipMap, OwnershipRule, SpecialFiles, parse_special_files,
};
pub use transport::{OctocrabTransport, RawResponse, ResponseHeaders, Transport, parse_next_link};
