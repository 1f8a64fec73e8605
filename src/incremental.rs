// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Timestamp-bounded refresh of recently updated items.
//!
//! This walk never reads or writes the positional checkpoint. Its progress
//! marker is the update time of the last item it handled, reported as
//! [`IncrementalPass::next_since`].

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    client::{ApiClient, Resource},
    clock::Clock,
    enrich::{Enrichment, WalkStop, enrich_item},
    model::{RepositoryRef, WorkItem, decode_work_item},
    transport::Transport,
};

/// Outcome of one incremental walk.
#[derive(Debug,)]
pub struct IncrementalPass
{
    /// Enriched items updated at or after `since`, oldest update first.
    pub items:      Vec<WorkItem,>,
    /// Malformed or authorless items that were skipped.
    pub skipped:    usize,
    /// Lower bound for the next refresh.
    pub next_since: DateTime<Utc,>,
    pub stop:       WalkStop,
}

impl IncrementalPass
{
    pub fn last_position(&self,) -> Option<u64,>
    {
        self.items.last().map(WorkItem::number,)
    }
}

/// Fetches items updated at or after `since`.
///
/// Pages are requested until one comes back empty, every decodable item on
/// one is older than `since`, or the API reports no further pages. A page
/// holding nothing but malformed items does not end the walk. The deadline
/// is checked before each page.
///
/// Fatal failures end the walk with [`WalkStop::Failed`], every other one
/// with [`WalkStop::Interrupted`]; both keep the items already handled.
pub async fn fetch_since<T: Transport, C: Clock,>(
    client: &ApiClient<T, C,>,
    repo: &RepositoryRef,
    since: DateTime<Utc,>,
    enrichment: Enrichment,
    deadline: DateTime<Utc,>,
) -> IncrementalPass
{
    info!(repository = %repo, since = %since, "starting incremental walk");
    let mut pass = IncrementalPass {
        items: Vec::new(), skipped: 0, next_since: since, stop: WalkStop::EndOfData,
    };
    let mut cursor: Option<String,> = None;

    pass.stop = 'pages: loop {
        if client.clock().now() >= deadline {
            break 'pages WalkStop::Deadline;
        }

        let page =
            match client.fetch_page(repo, Resource::IssuesUpdatedSince(since,), cursor.as_deref(),).await {
                Ok(page,) => page,
                Err(error,) => break 'pages WalkStop::from_error(error,),
            };
        if page.items.is_empty() {
            break 'pages WalkStop::EndOfData;
        }

        let mut decoded_on_page = 0usize;
        let mut stale_on_page = 0usize;
        for value in &page.items {
            let mut item = match decode_work_item(value,) {
                Ok(item,) => item,
                Err(error,) => {
                    warn!(repository = %repo, "skipping item: {}", error);
                    pass.skipped += 1;
                    continue;
                }
            };
            decoded_on_page += 1;
            if item.updated_at() < since {
                stale_on_page += 1;
                continue;
            }

            if let Err(error,) = enrich_item(client, repo, &mut item, enrichment,).await {
                break 'pages WalkStop::from_error(error,);
            }
            pass.next_since = pass.next_since.max(item.updated_at(),);
            pass.items.push(item,);
        }

        if decoded_on_page > 0 && stale_on_page == decoded_on_page {
            warn!(repository = %repo, "page holds only items older than {}, stopping", since);
            break 'pages WalkStop::EndOfData;
        }
        match page.next {
            Some(next,) => cursor = Some(next,),
            None => break 'pages WalkStop::EndOfData,
        }
    };

    info!(
        repository = %repo,
        items = pass.items.len(),
        skipped = pass.skipped,
        next_since = %pass.next_since,
        stop = ?pass.stop,
        "incremental walk finished"
    );
    pass
}
