// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Persistence of ingestion records and reporting of invocation results.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::info;

use crate::{Error, error::io_error, orchestrator::IngestionResult};

/// File name of the record produced by `result`:
/// `<owner>-<repository>-<mode>-<timestamp>.json`.
pub fn record_file_name(result: &IngestionResult,) -> String
{
    let record = &result.record;
    format!(
        "{}-{}-{}-{}.json",
        record.repository.owner,
        record.repository.repository,
        record.metadata.mode,
        record.metadata.scraped_at.format("%Y%m%dT%H%M%SZ",),
    )
}

/// Writes the record of `result` into `dir`, creating the directory when
/// needed, and returns the written path.
///
/// The file appears atomically, so readers never observe a partial record.
///
/// # Errors
///
/// Returns [`Error::Io`] when the directory or file cannot be written and
/// [`Error::Serialize`] when the record cannot be encoded.
pub fn write_record(dir: &Path, result: &IngestionResult,) -> Result<PathBuf, Error,>
{
    fs::create_dir_all(dir,).map_err(|source| io_error(dir, source,),)?;
    let path = dir.join(record_file_name(result,),);

    let mut file = NamedTempFile::new_in(dir,).map_err(|source| io_error(dir, source,),)?;
    serde_json::to_writer_pretty(&mut file, &result.record,)?;
    file.write_all(b"\n",).map_err(|source| io_error(&path, source,),)?;
    file.persist(&path,).map_err(|e| io_error(&path, e.error,),)?;

    info!(
        repository = %result.record.repository,
        path = %path.display(),
        items = result.items_processed,
        "record written"
    );
    Ok(path,)
}

/// Writes one record per result into `dir`.
///
/// Failed invocations are written as well: their records hold the items
/// handled before the failure, and those items may already lie behind the
/// stored checkpoint.
///
/// # Errors
///
/// Propagates the first [`write_record`] failure.
pub fn write_records(dir: &Path, results: &[IngestionResult],) -> Result<Vec<PathBuf,>, Error,>
{
    results.iter().map(|result| write_record(dir, result,),).collect()
}

/// Serializes the invocation results as one JSON array.
///
/// # Errors
///
/// Returns [`Error::Serialize`] when encoding fails and [`Error::Io`] when the
/// trailing newline cannot be written.
pub fn write_results<W: io::Write,>(writer: &mut W, results: &[IngestionResult], pretty: bool,) -> Result<(), Error,>
{
    if pretty {
        serde_json::to_writer_pretty(&mut *writer, results,)?;
    } else {
        serde_json::to_writer(&mut *writer, results,)?;
    }
    writer.write_all(b"\n",).map_err(|source| io_error(Path::new("<stdout>",), source,),)?;

    Ok((),)
}
