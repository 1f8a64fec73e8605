// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Rate-limited, retrying access to repository resources.
//!
//! [`ApiClient`] owns the [`RateBudget`] for its credential. Every attempt
//! reserves one request from the budget before it is sent, waits for the
//! quota window to reset when the budget sits at the safety floor, and
//! refreshes the budget from the response headers afterwards. Failed
//! attempts are classified into the crate [`Error`] taxonomy and handed to
//! [`retry_with_backoff`].

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    Error,
    clock::Clock,
    model::RepositoryRef,
    rate_limit::{RateBudget, epoch_seconds},
    retry::{RetryPolicy, retry_with_backoff},
    transport::{RawResponse, Transport, parse_next_link},
};

/// Largest page size accepted by the API.
pub const MAX_PAGE_SIZE: u8 = 100;

/// Wait applied to a 429 response that carries no reset information.
const FALLBACK_RATE_LIMIT_WAIT_SECS: i64 = 60;

/// Paginated collections the pipeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq,)]
pub enum Resource
{
    /// Accounts with commits, ordered by contribution count.
    Contributors,
    /// Issues and pull requests of every state, newest number first.
    IssuesNewestFirst,
    /// Issues and pull requests updated at or after the instant, oldest
    /// update first.
    IssuesUpdatedSince(DateTime<Utc,>,),
    /// Files changed by the given pull request.
    PullRequestFiles(u64,),
    /// Conversation comments of the given issue or pull request.
    IssueComments(u64,),
    /// Reviews submitted on the given pull request.
    PullRequestReviews(u64,),
}

impl Resource
{
    /// Relative URL of the first page.
    pub fn first_page(&self, repo: &RepositoryRef, per_page: u8,) -> String
    {
        let base = repo.api_path();
        match self {
            Self::Contributors => format!("{base}/contributors?per_page={per_page}&page=1"),
            Self::IssuesNewestFirst => {
                format!("{base}/issues?state=all&sort=created&direction=desc&per_page={per_page}&page=1")
            }
            Self::IssuesUpdatedSince(since,) => format!(
                "{base}/issues?state=all&sort=updated&direction=asc&since={}&per_page={per_page}&page=1",
                since.to_rfc3339_opts(SecondsFormat::Secs, true,)
            ),
            Self::PullRequestFiles(number,) => {
                format!("{base}/pulls/{number}/files?per_page={per_page}&page=1")
            }
            Self::IssueComments(number,) => {
                format!("{base}/issues/{number}/comments?per_page={per_page}&page=1")
            }
            Self::PullRequestReviews(number,) => {
                format!("{base}/pulls/{number}/reviews?per_page={per_page}&page=1")
            }
        }
    }
}

/// One page of a paginated collection.
#[derive(Debug, Clone,)]
pub struct Page
{
    /// Raw JSON elements, decoded individually by the caller.
    pub items:  Vec<Value,>,
    /// Cursor of the following page, `None` on the last page.
    pub next:   Option<String,>,
    /// Budget snapshot taken after the response was observed.
    pub budget: RateBudget,
}

/// Hosting API client enforcing the request quota and retry policy.
pub struct ApiClient<T, C,>
{
    transport:     T,
    clock:         C,
    retry:         RetryPolicy,
    budget:        Mutex<RateBudget,>,
    floor_percent: u8,
    page_size:     u8,
    deadline:      Option<DateTime<Utc,>,>,
}

impl<T: Transport, C: Clock,> ApiClient<T, C,>
{
    /// Creates a client whose budget matches the transport credential.
    pub fn new(transport: T, clock: C,) -> Self
    {
        let budget = RateBudget::for_credential(transport.is_authenticated(), clock.now(),);
        Self {
            transport,
            clock,
            retry: RetryPolicy::default(),
            budget: Mutex::new(budget,),
            floor_percent: 1,
            page_size: MAX_PAGE_SIZE,
            deadline: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy,) -> Self
    {
        self.retry = retry;
        self
    }

    /// Sets the page size, clamped to `1..=100`.
    pub fn with_page_size(mut self, page_size: u8,) -> Self
    {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE,);
        self
    }

    /// Sets the share of the quota kept in reserve.
    pub fn with_floor_percent(mut self, percent: u8,) -> Self
    {
        self.floor_percent = percent.min(100,);
        self
    }

    /// Replaces the initial budget estimate.
    pub fn with_budget(self, budget: RateBudget,) -> Self
    {
        Self {
            budget: Mutex::new(budget,), ..self
        }
    }

    /// Bounds every wait performed by the client. Waits that would end
    /// after `deadline` fail with [`Error::TransientFetch`] instead.
    pub fn set_deadline(&mut self, deadline: Option<DateTime<Utc,>,>,)
    {
        self.deadline = deadline;
    }

    pub fn deadline(&self,) -> Option<DateTime<Utc,>,>
    {
        self.deadline
    }

    pub fn clock(&self,) -> &C
    {
        &self.clock
    }

    /// Current budget estimate.
    pub async fn budget(&self,) -> RateBudget
    {
        *self.budget.lock().await
    }

    /// Fetches one page of `resource`.
    ///
    /// `cursor` is `None` for the first page and the `next` value of the
    /// previous [`Page`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FatalAuth`] for rejected credentials,
    /// [`Error::TransientFetch`] once retries are exhausted,
    /// [`Error::MalformedResponse`] when the body is not a JSON array, and
    /// [`Error::NotFound`] for unknown repositories.
    pub async fn fetch_page(
        &self,
        repo: &RepositoryRef,
        resource: Resource,
        cursor: Option<&str,>,
    ) -> Result<Page, Error,>
    {
        let url = match cursor {
            Some(cursor,) => cursor.to_owned(),
            None => resource.first_page(repo, self.page_size,),
        };
        let response = self.send(&url,).await?;

        let body = response.body.trim();
        let parsed = if body.is_empty() { Ok(Value::Array(Vec::new(),),) } else { serde_json::from_str(body,) };
        let items = match parsed {
            Ok(Value::Array(items,),) => items,
            Ok(other,) => {
                return Err(Error::malformed(format!(
                    "{url} returned {} instead of an array",
                    json_kind(&other)
                ),),);
            }
            Err(e,) => return Err(Error::malformed(format!("{url} returned invalid JSON: {e}"),),),
        };
        let next = response.headers.link.as_deref().and_then(parse_next_link,);
        let budget = self.budget().await;
        debug!(url = %url, items = items.len(), remaining = budget.remaining, "fetched page");

        Ok(Page {
            items, next, budget,
        },)
    }

    /// Fetches every page of `resource`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by [`ApiClient::fetch_page`].
    pub async fn fetch_all(&self, repo: &RepositoryRef, resource: Resource,) -> Result<Vec<Value,>, Error,>
    {
        let mut items = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.fetch_page(repo, resource, cursor.as_deref(),).await?;
            items.extend(page.items,);
            match page.next {
                Some(next,) => cursor = Some(next,),
                None => return Ok(items,),
            }
        }
    }

    /// Fetches the repository document itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown or inaccessible repositories,
    /// [`Error::MalformedResponse`] when the body is not a JSON object, and
    /// propagates every other fetch error.
    pub async fn repository(&self, repo: &RepositoryRef,) -> Result<Value, Error,>
    {
        let url = repo.api_path();
        let response = self.send(&url,).await?;
        match serde_json::from_str(&response.body,) {
            Ok(value @ Value::Object(_,),) => Ok(value,),
            Ok(other,) => {
                Err(Error::malformed(format!("{url} returned {} instead of an object", json_kind(&other)),),)
            }
            Err(e,) => Err(Error::malformed(format!("{url} returned invalid JSON: {e}"),),),
        }
    }

    /// Reads a file from the default branch, `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] when the contents payload is not
    /// base64 encoded UTF-8 text, and propagates fetch errors other than
    /// [`Error::NotFound`].
    pub async fn file_content(&self, repo: &RepositoryRef, path: &str,) -> Result<Option<String,>, Error,>
    {
        let url = format!("{}/contents/{path}", repo.api_path());
        let response = match self.send(&url,).await {
            Ok(response,) => response,
            Err(Error::NotFound {
                ..
            },) => return Ok(None,),
            Err(error,) => return Err(error,),
        };

        let payload: Value = serde_json::from_str(&response.body,)
            .map_err(|e| Error::malformed(format!("{url} returned invalid JSON: {e}"),),)?;
        let encoded = payload
            .get("content",)
            .and_then(Value::as_str,)
            .ok_or_else(|| Error::malformed(format!("{url} has no file content"),),)?;
        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace(),).collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact,)
            .map_err(|e| Error::malformed(format!("{url} content is not base64: {e}"),),)?;
        let text = String::from_utf8(bytes,)
            .map_err(|e| Error::malformed(format!("{url} content is not UTF-8: {e}"),),)?;

        Ok(Some(text,),)
    }

    async fn send(&self, url: &str,) -> Result<RawResponse, Error,>
    {
        retry_with_backoff(&self.retry, &self.clock, self.deadline, url, || self.attempt(url,),).await
    }

    async fn attempt(&self, url: &str,) -> Result<RawResponse, Error,>
    {
        {
            let mut budget = self.budget.lock().await;
            if let Some(reset_at,) = budget.wait_until(self.floor_percent, self.clock.now(),) {
                if self.deadline.is_some_and(|deadline| reset_at > deadline,) {
                    return Err(Error::RateLimited {
                        reset_at,
                    },);
                }
                info!(
                    remaining = budget.remaining,
                    reset_at = %reset_at,
                    "rate budget at safety floor, waiting for reset"
                );
                self.clock.sleep_until(reset_at,).await;
            }
            budget.consume(self.floor_percent, self.clock.now(),);
        }

        let response = self.transport.get(url,).await?;
        self.budget.lock().await.observe(&response.headers,);
        classify(url, response, self.clock.now(),)
    }
}

fn classify(url: &str, response: RawResponse, now: DateTime<Utc,>,) -> Result<RawResponse, Error,>
{
    let headers = &response.headers;
    let rate_limited = headers.rate_limit_remaining == Some(0,) || headers.retry_after.is_some();

    match response.status {
        200..=299 => Ok(response,),
        401 => Err(Error::fatal_auth(format!("{url} rejected the credential (401)"),),),
        403 | 429 if rate_limited || response.status == 429 => {
            let reset_at = headers
                .retry_after
                .and_then(|secs| i64::try_from(secs,).ok(),)
                .map(|secs| now + chrono::Duration::seconds(secs,),)
                .or_else(|| headers.rate_limit_reset.and_then(epoch_seconds,),)
                .unwrap_or(now + chrono::Duration::seconds(FALLBACK_RATE_LIMIT_WAIT_SECS,),);
            Err(Error::RateLimited {
                reset_at,
            },)
        }
        403 => Err(Error::fatal_auth(format!("{url} is forbidden for the credential (403)"),),),
        404 => Err(Error::NotFound {
            url: url.to_owned(),
        },),
        500..=599 => Err(Error::transient(format!("{url} answered {}", response.status),),),
        status => Err(Error::malformed(format!("{url} answered unexpected status {status}"),),),
    }
}

fn json_kind(value: &Value,) -> &'static str
{
    match value {
        Value::Null => "null",
        Value::Bool(_,) => "a boolean",
        Value::Number(_,) => "a number",
        Value::String(_,) => "a string",
        Value::Array(_,) => "an array",
        Value::Object(_,) => "an object",
    }
}
