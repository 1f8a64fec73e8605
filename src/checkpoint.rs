// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Durable record of positional ingestion progress per repository.
//!
//! The stored position is the number of the last item that was fully
//! processed. A resumed walk only handles items numbered strictly below it.
//! Position `0` is the sentinel for "start from the newest item"; it is
//! written by [`CheckpointStore::reset`] and when a pass reaches the end of
//! the data.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{Error, error::io_error, model::RepositoryRef};

/// Position meaning "no progress recorded, start from the newest item".
pub const START_POSITION: u64 = 0;

/// Persisted progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint
{
    /// Number of the last fully processed item, or [`START_POSITION`].
    pub last_processed_position: u64,
    /// Time of the write.
    pub last_checkpoint_at:      DateTime<Utc,>,
}

impl Checkpoint
{
    /// Whether the checkpoint marks the start of a new pass.
    pub fn is_start(&self,) -> bool
    {
        self.last_processed_position == START_POSITION
    }

    /// Exclusive upper bound for the next walk, `None` when the walk starts
    /// at the newest item.
    pub fn resume_below(&self,) -> Option<u64,>
    {
        (!self.is_start()).then_some(self.last_processed_position,)
    }
}

/// Key-value store of checkpoints, one per repository.
///
/// Writers for the same repository are expected to be serialized by the
/// caller; the store performs last-writer-wins upserts without locking.
pub trait CheckpointStore: Send + Sync
{
    /// Returns the stored checkpoint, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] or [`Error::Io`] when the backing store
    /// cannot be read.
    fn get(&self, repo: &RepositoryRef,) -> Result<Option<Checkpoint,>, Error,>;

    /// Upserts the checkpoint of `repo`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] or [`Error::Io`] when the write fails.
    fn set(&self, repo: &RepositoryRef, position: u64, now: DateTime<Utc,>,) -> Result<Checkpoint, Error,>;

    /// Moves the checkpoint back to [`START_POSITION`].
    ///
    /// # Errors
    ///
    /// Same as [`CheckpointStore::set`].
    fn reset(&self, repo: &RepositoryRef, now: DateTime<Utc,>,) -> Result<Checkpoint, Error,>
    {
        self.set(repo, START_POSITION, now,)
    }
}

impl<S: CheckpointStore,> CheckpointStore for &S
{
    fn get(&self, repo: &RepositoryRef,) -> Result<Option<Checkpoint,>, Error,>
    {
        (**self).get(repo,)
    }

    fn set(&self, repo: &RepositoryRef, position: u64, now: DateTime<Utc,>,) -> Result<Checkpoint, Error,>
    {
        (**self).set(repo, position, now,)
    }
}

impl<S: CheckpointStore,> CheckpointStore for Arc<S,>
{
    fn get(&self, repo: &RepositoryRef,) -> Result<Option<Checkpoint,>, Error,>
    {
        (**self).get(repo,)
    }

    fn set(&self, repo: &RepositoryRef, position: u64, now: DateTime<Utc,>,) -> Result<Checkpoint, Error,>
    {
        (**self).set(repo, position, now,)
    }
}

/// In-process store that also records every write.
#[derive(Debug, Default,)]
pub struct MemoryCheckpointStore
{
    entries: Mutex<BTreeMap<RepositoryRef, Checkpoint,>,>,
    writes:  Mutex<Vec<(RepositoryRef, u64,),>,>,
}

impl MemoryCheckpointStore
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Positions written so far, in write order.
    pub fn writes(&self,) -> Vec<(RepositoryRef, u64,),>
    {
        self.writes.lock().map(|writes| writes.clone(),).unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore
{
    fn get(&self, repo: &RepositoryRef,) -> Result<Option<Checkpoint,>, Error,>
    {
        let entries = self.entries.lock().map_err(|_| Error::checkpoint("checkpoint map is poisoned",),)?;
        Ok(entries.get(repo,).copied(),)
    }

    fn set(&self, repo: &RepositoryRef, position: u64, now: DateTime<Utc,>,) -> Result<Checkpoint, Error,>
    {
        let checkpoint = Checkpoint {
            last_processed_position: position, last_checkpoint_at: now,
        };
        self.entries
            .lock()
            .map_err(|_| Error::checkpoint("checkpoint map is poisoned",),)?
            .insert(repo.clone(), checkpoint,);
        if let Ok(mut writes,) = self.writes.lock() {
            writes.push((repo.clone(), position,),);
        }
        Ok(checkpoint,)
    }
}

/// Store backed by one JSON document mapping `owner/repository` to its
/// checkpoint.
///
/// Every write replaces the document atomically, so a process killed during
/// a write leaves the previous version in place.
#[derive(Debug, Clone,)]
pub struct JsonFileCheckpointStore
{
    path: PathBuf,
}

impl JsonFileCheckpointStore
{
    pub fn new(path: impl Into<PathBuf,>,) -> Self
    {
        Self {
            path: path.into(),
        }
    }

    pub fn path(&self,) -> &Path
    {
        &self.path
    }

    fn load(&self,) -> Result<BTreeMap<String, Checkpoint,>, Error,>
    {
        let content = match fs::read_to_string(&self.path,) {
            Ok(content,) => content,
            Err(error,) if error.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new(),),
            Err(error,) => return Err(io_error(&self.path, error,),),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new(),);
        }
        serde_json::from_str(&content,).map_err(|e| {
            Error::checkpoint(format!("{} is not a checkpoint document: {e}", self.path.display()),)
        },)
    }

    fn save(&self, entries: &BTreeMap<String, Checkpoint,>,) -> Result<(), Error,>
    {
        let directory = match self.path.parent() {
            Some(parent,) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from(".",),
        };
        fs::create_dir_all(&directory,).map_err(|e| io_error(&directory, e,),)?;

        let mut file = NamedTempFile::new_in(&directory,).map_err(|e| io_error(&directory, e,),)?;
        serde_json::to_writer_pretty(&mut file, entries,)?;
        file.write_all(b"\n",).map_err(|e| io_error(file.path(), e,),)?;
        file.as_file().sync_all().map_err(|e| io_error(file.path(), e,),)?;
        file.persist(&self.path,).map_err(|e| io_error(&self.path, e.error,),)?;

        Ok((),)
    }
}

impl CheckpointStore for JsonFileCheckpointStore
{
    fn get(&self, repo: &RepositoryRef,) -> Result<Option<Checkpoint,>, Error,>
    {
        Ok(self.load()?.get(&repo.to_string(),).copied(),)
    }

    fn set(&self, repo: &RepositoryRef, position: u64, now: DateTime<Utc,>,) -> Result<Checkpoint, Error,>
    {
        let mut entries = self.load()?;
        let checkpoint = Checkpoint {
            last_processed_position: position, last_checkpoint_at: now,
        };
        entries.insert(repo.to_string(), checkpoint,);
        self.save(&entries,)?;
        debug!(repository = %repo, position, path = %self.path.display(), "checkpoint written");

        Ok(checkpoint,)
    }
}
