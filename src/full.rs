// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Newest-to-oldest positional walk that resumes from the stored checkpoint.
//!
//! Issues and pull requests share one number space, so a single walk over
//! the issues collection covers both. The walk only emits items numbered
//! strictly below every item it has already handled, which keeps positions
//! strictly descending even when new items shift the pages underneath it.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    Error,
    checkpoint::CheckpointStore,
    client::{ApiClient, Resource},
    clock::Clock,
    enrich::{Enrichment, WalkStop, enrich_item},
    model::{RepositoryRef, WorkItem, decode_work_item, item_number},
    transport::Transport,
};

/// Parameters of a positional walk.
#[derive(Debug, Clone, Copy,)]
pub struct WalkOptions
{
    /// Items handled between two checkpoint writes.
    pub checkpoint_interval: u32,
    /// Collections attached to pull requests.
    pub enrichment:          Enrichment,
    /// Instant after which no new page is requested.
    pub deadline:            DateTime<Utc,>,
}

/// Outcome of one invocation of the positional walk.
#[derive(Debug,)]
pub struct FullPass
{
    /// Fully enriched items in walk order.
    pub items:          Vec<WorkItem,>,
    /// Exclusive bound the walk started from, `None` for a fresh pass.
    pub resumed_below:  Option<u64,>,
    /// Number of the last handled item, emitted or skipped.
    pub last_position:  Option<u64,>,
    /// Last position written to the store by this walk.
    pub committed:      Option<u64,>,
    /// Malformed or authorless items that were skipped.
    pub skipped:        usize,
    pub stop:           WalkStop,
}

impl FullPass
{
    /// Whether the API reported no further pages.
    pub fn reached_end(&self,) -> bool
    {
        self.stop.reached_end()
    }
}

/// Walks the repository from its checkpoint towards the oldest item.
///
/// A checkpoint is written after every `checkpoint_interval` handled items,
/// at the number of the most recently handled item. Items skipped as
/// malformed count as handled. The deadline is checked before each page, so
/// the walk never stops in the middle of one.
///
/// Failures raised after the walk started never discard the items already
/// handled: fatal ones and checkpoint writes that fail end the walk with
/// [`WalkStop::Failed`], every other one with [`WalkStop::Interrupted`].
///
/// # Errors
///
/// Returns the checkpoint store failure when the resume point cannot be
/// read.
pub async fn fetch_from_checkpoint<T, C, S,>(
    client: &ApiClient<T, C,>,
    store: &S,
    repo: &RepositoryRef,
    options: WalkOptions,
) -> Result<FullPass, Error,>
where
    T: Transport,
    C: Clock,
    S: CheckpointStore,
{
    let resumed_below = store.get(repo,)?.and_then(|checkpoint| checkpoint.resume_below(),);
    let interval = options.checkpoint_interval.max(1,);
    info!(repository = %repo, resume_below = ?resumed_below, "starting positional walk");

    let mut pass = FullPass {
        items: Vec::new(),
        resumed_below,
        last_position: None,
        committed: None,
        skipped: 0,
        stop: WalkStop::EndOfData,
    };
    let mut since_commit = 0u32;
    let mut cursor: Option<String,> = None;

    pass.stop = 'pages: loop {
        if client.clock().now() >= options.deadline {
            break 'pages WalkStop::Deadline;
        }

        let page = match client.fetch_page(repo, Resource::IssuesNewestFirst, cursor.as_deref(),).await {
            Ok(page,) => page,
            Err(error,) => break 'pages WalkStop::from_error(error,),
        };

        for value in &page.items {
            let Some(number,) = item_number(value,) else {
                warn!(repository = %repo, "skipping item without a number");
                pass.skipped += 1;
                continue;
            };
            let bound = pass.last_position.or(resumed_below,);
            if bound.is_some_and(|bound| number >= bound,) {
                continue;
            }

            match decode_work_item(value,) {
                Ok(mut item,) => match enrich_item(client, repo, &mut item, options.enrichment,).await {
                    Ok((),) => pass.items.push(item,),
                    Err(error,) => break 'pages WalkStop::from_error(error,),
                },
                Err(error,) => {
                    warn!(repository = %repo, position = number, "skipping item: {}", error);
                    pass.skipped += 1;
                }
            }

            pass.last_position = Some(number,);
            since_commit += 1;
            if since_commit >= interval {
                if let Err(error,) = store.set(repo, number, client.clock().now(),) {
                    break 'pages WalkStop::Failed(error,);
                }
                pass.committed = Some(number,);
                since_commit = 0;
                debug!(repository = %repo, position = number, "checkpoint committed");
            }
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
        last_position = ?pass.last_position,
        stop = ?pass.stop,
        "positional walk finished"
    );
    Ok(pass,)
}

#[cfg(test)]
mod tests
{
    use std::sync::Arc;

    use super::*;
    use crate::{
        checkpoint::{Checkpoint, MemoryCheckpointStore},
        testing::{FakeClock, FakeGitHub, FakeItem, epoch, status},
        transport::ResponseHeaders,
    };

    fn repo() -> RepositoryRef
    {
        RepositoryRef::new("acme", "widgets",).expect("valid repository",)
    }

    fn items(count: u64,) -> Vec<FakeItem,>
    {
        (1..=count)
            .map(|n| if n % 4 == 0 { FakeItem::pull_request(n,) } else { FakeItem::issue(n,) },)
            .collect()
    }

    fn options(deadline: DateTime<Utc,>,) -> WalkOptions
    {
        WalkOptions {
            checkpoint_interval: 3, enrichment: Enrichment::ALL, deadline,
        }
    }

    fn numbers(pass: &FullPass,) -> Vec<u64,>
    {
        pass.items.iter().map(WorkItem::number,).collect()
    }

    #[tokio::test]
    async fn unbounded_walk_visits_every_item_newest_first()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), items(12,),);
        let client = ApiClient::new(github, clock,).with_page_size(5,);
        let store = MemoryCheckpointStore::new();

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::hours(1,),),)
            .await
            .expect("walk",);

        assert!(pass.reached_end());
        assert_eq!(numbers(&pass), (1..=12).rev().collect::<Vec<_,>>());
        let positions: Vec<u64,> = store.writes().into_iter().map(|(_, position,)| position,).collect();
        assert_eq!(positions, vec![10, 7, 4, 1]);
    }

    #[tokio::test]
    async fn resume_excludes_the_stored_position()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), items(12,),);
        let client = ApiClient::new(github, clock,).with_page_size(5,);
        let store = MemoryCheckpointStore::new();
        store.set(&repo(), 8, epoch(),).expect("seed",);

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::hours(1,),),)
            .await
            .expect("walk",);

        assert_eq!(pass.resumed_below, Some(8));
        assert_eq!(numbers(&pass), vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn deadline_stops_between_pages_at_whole_items()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), items(20,),).with_request_cost(chrono::Duration::seconds(10,),);
        let client = ApiClient::new(github, clock,).with_page_size(5,);
        let store = MemoryCheckpointStore::new();

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::seconds(25,),),)
            .await
            .expect("walk",);

        assert!(matches!(pass.stop, WalkStop::Deadline));
        assert_eq!(pass.items.len() % 5, 0);
        let last = pass.last_position.expect("progress made",);
        assert_eq!(numbers(&pass).last().copied(), Some(last));
        assert!(numbers(&pass).windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[tokio::test]
    async fn transient_failure_interrupts_after_last_whole_item()
    {
        let clock = FakeClock::at(epoch(),);
        let github = Arc::new(FakeGitHub::new(clock.clone(), items(10,),),);
        github.inject("page=2", 5, Ok(status(502, ResponseHeaders::default(),),),);
        let client = ApiClient::new(github.clone(), clock,).with_page_size(5,);
        let store = MemoryCheckpointStore::new();

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::hours(1,),),)
            .await
            .expect("walk",);

        assert!(matches!(pass.stop, WalkStop::Interrupted(Error::TransientFetch { .. })));
        assert_eq!(numbers(&pass), vec![10, 9, 8, 7, 6]);
        assert_eq!(pass.last_position, Some(6));
        assert_eq!(pass.committed, Some(8));
    }

    #[tokio::test]
    async fn unauthorized_first_page_fails_without_items()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), items(3,),);
        github.inject("/issues", 1, Ok(status(401, ResponseHeaders::default(),),),);
        let client = ApiClient::new(github, clock,);
        let store = MemoryCheckpointStore::new();

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::hours(1,),),)
            .await
            .expect("walk",);

        assert!(matches!(pass.stop, WalkStop::Failed(Error::FatalAuth { .. })));
        assert!(pass.items.is_empty());
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn credential_rejected_mid_walk_keeps_handled_items()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), items(10,),);
        github.inject("page=2", 1, Ok(status(401, ResponseHeaders::default(),),),);
        let client = ApiClient::new(github, clock,).with_page_size(5,);
        let store = MemoryCheckpointStore::new();

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::hours(1,),),)
            .await
            .expect("walk",);

        assert!(matches!(pass.stop, WalkStop::Failed(Error::FatalAuth { .. })));
        assert_eq!(numbers(&pass), vec![10, 9, 8, 7, 6]);
        assert_eq!(pass.committed, Some(8));
        assert_eq!(pass.last_position, Some(6));
    }

    #[tokio::test]
    async fn missing_repository_fails_the_walk()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), items(3,),);
        github.inject("/issues", 1, Ok(status(404, ResponseHeaders::default(),),),);
        let client = ApiClient::new(github, clock,);
        let store = MemoryCheckpointStore::new();

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::hours(1,),),)
            .await
            .expect("walk",);

        assert!(matches!(pass.stop, WalkStop::Failed(Error::NotFound { .. })));
    }

    struct ReadOnlyStore(MemoryCheckpointStore,);

    impl CheckpointStore for ReadOnlyStore
    {
        fn get(&self, repo: &RepositoryRef,) -> Result<Option<Checkpoint,>, Error,>
        {
            self.0.get(repo,)
        }

        fn set(&self, _repo: &RepositoryRef, _position: u64, _now: DateTime<Utc,>,) -> Result<Checkpoint, Error,>
        {
            Err(Error::checkpoint("read-only store",),)
        }
    }

    #[tokio::test]
    async fn failed_commit_ends_the_walk_with_the_handled_items()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), items(10,),);
        let client = ApiClient::new(github, clock,).with_page_size(5,);
        let store = ReadOnlyStore(MemoryCheckpointStore::new(),);

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::hours(1,),),)
            .await
            .expect("walk",);

        assert!(matches!(pass.stop, WalkStop::Failed(Error::Checkpoint { .. })));
        assert_eq!(numbers(&pass), vec![10, 9, 8]);
        assert_eq!(pass.committed, None);
    }

    #[tokio::test]
    async fn malformed_items_are_skipped_and_counted()
    {
        let clock = FakeClock::at(epoch(),);
        let mut fake = items(6,);
        fake[1].author = None;
        let github = FakeGitHub::new(clock.clone(), fake,).with_malformed(5,);
        let client = ApiClient::new(github, clock,);
        let store = MemoryCheckpointStore::new();

        let pass = fetch_from_checkpoint(&client, &store, &repo(), options(epoch() + chrono::Duration::hours(1,),),)
            .await
            .expect("walk",);

        assert!(pass.reached_end());
        assert_eq!(pass.skipped, 2);
        assert_eq!(numbers(&pass), vec![6, 4, 3, 1]);
        assert_eq!(pass.last_position, Some(1));
    }
}
