// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Per-item enrichment shared by the full and incremental walks.

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    Error,
    client::{ApiClient, Resource},
    clock::Clock,
    links::extract_linked_issues,
    model::{RepositoryRef, WorkItem, decode_changed_file, decode_comment, decode_review},
    transport::Transport,
};

/// Reason a walk stopped before or at the end of its data.
#[derive(Debug,)]
pub enum WalkStop
{
    /// The API reported no further pages.
    EndOfData,
    /// The deadline passed before the next page was requested.
    Deadline,
    /// A recoverable failure ended the walk; the next invocation resumes.
    Interrupted(Error,),
    /// An unrecoverable failure ended the walk. Items handled before it are
    /// still part of the pass and must be emitted.
    Failed(Error,),
}

impl WalkStop
{
    pub fn reached_end(&self,) -> bool
    {
        matches!(self, Self::EndOfData)
    }

    /// Classifies a failure raised while walking.
    pub(crate) fn from_error(error: Error,) -> Self
    {
        if error.is_fatal() { Self::Failed(error,) } else { Self::Interrupted(error,) }
    }
}

/// Extra requests spent on each pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
pub struct Enrichment
{
    /// List the files changed by the pull request.
    pub files:      bool,
    /// List conversation comments and reviews.
    pub discussion: bool,
}

impl Enrichment
{
    pub const ALL: Self = Self {
        files: true, discussion: true,
    };
    pub const NONE: Self = Self {
        files: false, discussion: false,
    };
}

/// Attaches linked issues and, for pull requests, the collections selected
/// by `enrichment`.
///
/// The item counts as fully processed only when this returns `Ok`.
///
/// # Errors
///
/// Propagates fetch errors raised while listing pull request files,
/// comments or reviews, except [`Error::NotFound`], which leaves the
/// collection empty.
pub async fn enrich_item<T: Transport, C: Clock,>(
    client: &ApiClient<T, C,>,
    repo: &RepositoryRef,
    item: &mut WorkItem,
    enrichment: Enrichment,
) -> Result<(), Error,>
{
    match item {
        WorkItem::Issue(issue,) => {
            let text = format!("{}\n{}", issue.title, issue.body.as_deref().unwrap_or_default());
            issue.linked_issues = extract_linked_issues(&text, issue.number,);
        }
        WorkItem::PullRequest(pull,) => {
            let text = format!("{}\n{}", pull.title, pull.body.as_deref().unwrap_or_default());
            pull.linked_issues = extract_linked_issues(&text, pull.number,);

            if enrichment.files {
                let values = list_or_empty(client, repo, Resource::PullRequestFiles(pull.number,),).await?;
                pull.files = values
                    .iter()
                    .filter_map(|value| {
                        decode_changed_file(value,)
                            .inspect_err(|error| {
                                warn!(repository = %repo, number = pull.number, "skipping changed file: {}", error)
                            },)
                            .ok()
                    },)
                    .collect();
            }
            if enrichment.discussion {
                let values = list_or_empty(client, repo, Resource::IssueComments(pull.number,),).await?;
                pull.comments = values
                    .iter()
                    .filter_map(|value| {
                        decode_comment(value,)
                            .inspect_err(|error| {
                                warn!(repository = %repo, number = pull.number, "skipping comment: {}", error)
                            },)
                            .ok()
                            .flatten()
                    },)
                    .collect();

                let values = list_or_empty(client, repo, Resource::PullRequestReviews(pull.number,),).await?;
                pull.reviews = values
                    .iter()
                    .filter_map(|value| {
                        decode_review(value,)
                            .inspect_err(|error| {
                                warn!(repository = %repo, number = pull.number, "skipping review: {}", error)
                            },)
                            .ok()
                            .flatten()
                    },)
                    .collect();
            }
        }
    }

    debug!(repository = %repo, number = item.number(), "item enriched");
    Ok((),)
}

async fn list_or_empty<T: Transport, C: Clock,>(
    client: &ApiClient<T, C,>,
    repo: &RepositoryRef,
    resource: Resource,
) -> Result<Vec<Value,>, Error,>
{
    match client.fetch_all(repo, resource,).await {
        Ok(values,) => Ok(values,),
        Err(Error::NotFound {
            url,
        },) => {
            warn!(repository = %repo, url = %url, "pull request collection not found");
            Ok(Vec::new(),)
        }
        Err(error,) => Err(error,),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::{
        model::decode_work_item,
        testing::{FakeClock, FakeGitHub, FakeItem, epoch},
        transport::ResponseHeaders,
    };

    fn repo() -> RepositoryRef
    {
        RepositoryRef::new("acme", "widgets",).expect("valid repository",)
    }

    fn item(fake: &FakeItem,) -> WorkItem
    {
        decode_work_item(&fake.to_json(),).expect("fake items decode",)
    }

    #[tokio::test]
    async fn issue_gets_linked_issues_without_requests()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), Vec::new(),);
        let client = ApiClient::new(github, clock,);
        let mut issue = item(&FakeItem::issue(9,).with_body("dup of #3, see #9",),);

        enrich_item(&client, &repo(), &mut issue, Enrichment::ALL,).await.expect("enriched",);

        let WorkItem::Issue(issue,) = issue else {
            panic!("expected issue");
        };
        assert_eq!(issue.linked_issues.into_iter().collect::<Vec<_,>>(), vec![3]);
    }

    #[tokio::test]
    async fn pull_request_gets_changed_files()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), Vec::new(),);
        let client = ApiClient::new(github, clock,);
        let mut pull = item(&FakeItem::pull_request(12,).with_body("Fixes #4",),);

        enrich_item(&client, &repo(), &mut pull, Enrichment::ALL,).await.expect("enriched",);

        let WorkItem::PullRequest(pull,) = pull else {
            panic!("expected pull request");
        };
        assert_eq!(pull.linked_issues.into_iter().collect::<Vec<_,>>(), vec![4]);
        assert_eq!(pull.files.len(), 1);
        assert_eq!(pull.files[0].directory, "src/module12");
    }

    #[tokio::test]
    async fn pull_request_gets_comments_and_reviews()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), Vec::new(),);
        let client = ApiClient::new(github, clock,);
        let mut pull = item(&FakeItem::pull_request(12,),);

        enrich_item(&client, &repo(), &mut pull, Enrichment::ALL,).await.expect("enriched",);

        let WorkItem::PullRequest(pull,) = pull else {
            panic!("expected pull request");
        };
        assert_eq!(pull.comments.len(), 1, "comments of deleted accounts are dropped");
        assert_eq!(pull.comments[0].author, "alice");
        assert_eq!(pull.comments[0].body, "comment on 12");
        assert_eq!(pull.reviews.len(), 1);
        assert_eq!(pull.reviews[0].state, "APPROVED");
    }

    #[tokio::test]
    async fn missing_review_listing_leaves_reviews_empty()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), Vec::new(),);
        github.inject("/pulls/12/reviews", 1, Ok(crate::testing::status(404, ResponseHeaders::default(),),),);
        let client = ApiClient::new(github, clock,);
        let mut pull = item(&FakeItem::pull_request(12,),);

        enrich_item(&client, &repo(), &mut pull, Enrichment::ALL,).await.expect("enriched",);

        let WorkItem::PullRequest(pull,) = pull else {
            panic!("expected pull request");
        };
        assert!(pull.reviews.is_empty());
        assert_eq!(pull.comments.len(), 1);
        assert_eq!(pull.files.len(), 1);
    }

    #[tokio::test]
    async fn pull_request_collections_can_be_disabled()
    {
        let clock = FakeClock::at(epoch(),);
        let github = std::sync::Arc::new(FakeGitHub::new(clock.clone(), Vec::new(),),);
        let client = ApiClient::new(github.clone(), clock,);
        let mut pull = item(&FakeItem::pull_request(12,),);

        enrich_item(&client, &repo(), &mut pull, Enrichment::NONE,).await.expect("enriched",);

        assert!(github.requests().is_empty());
    }

    #[tokio::test]
    async fn discussion_alone_skips_the_file_listing()
    {
        let clock = FakeClock::at(epoch(),);
        let github = std::sync::Arc::new(FakeGitHub::new(clock.clone(), Vec::new(),),);
        let client = ApiClient::new(github.clone(), clock,);
        let mut pull = item(&FakeItem::pull_request(12,),);
        let discussion = Enrichment {
            files: false, discussion: true,
        };

        enrich_item(&client, &repo(), &mut pull, discussion,).await.expect("enriched",);

        let urls: Vec<String,> = github.requests().into_iter().map(|(url, _,)| url,).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().all(|url| !url.contains("/files")));
    }

    #[test]
    fn only_fatal_errors_fail_the_walk()
    {
        assert!(matches!(WalkStop::from_error(Error::fatal_auth("401",),), WalkStop::Failed(_,)));
        assert!(matches!(
            WalkStop::from_error(Error::NotFound {
                url: "/repos/acme/widgets/issues".to_owned(),
            },),
            WalkStop::Failed(_,)
        ));
        assert!(matches!(WalkStop::from_error(Error::transient("503",),), WalkStop::Interrupted(_,)));
        assert!(!WalkStop::Failed(Error::fatal_auth("401",),).reached_end());
    }

    #[tokio::test]
    async fn transient_file_failure_propagates()
    {
        let clock = FakeClock::at(epoch(),);
        let github = FakeGitHub::new(clock.clone(), Vec::new(),);
        github.inject("/pulls/12/files", 10, Ok(crate::testing::status(503, ResponseHeaders::default(),),),);
        let client = ApiClient::new(github, clock,);
        let mut pull = item(&FakeItem::pull_request(12,),);

        let error = enrich_item(&client, &repo(), &mut pull, Enrichment::ALL,).await.expect_err("transient",);

        assert!(matches!(error, Error::TransientFetch { .. }));
    }
}
