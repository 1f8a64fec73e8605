// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Records produced by the ingestion pipeline.
//!
//! Items are decoded one JSON value at a time so that a single malformed
//! entry is reported as [`Error::MalformedResponse`] and skipped without
//! discarding the rest of its page.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

/// Repository tracked by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,)]
pub struct RepositoryRef
{
    /// GitHub account or organization owning the repository.
    pub owner:      String,
    /// Repository name.
    pub repository: String,
}

impl RepositoryRef
{
    /// Creates a reference after validating both components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a component is empty or contains a
    /// path separator.
    pub fn new(owner: &str, repository: &str,) -> Result<Self, Error,>
    {
        let owner = owner.trim();
        let repository = repository.trim();
        for (label, value,) in [("owner", owner,), ("repository", repository,),] {
            if value.is_empty() {
                return Err(Error::validation(format!("{label} must not be empty"),),);
            }
            if value.contains(['/', '?', '#', ' ',],) {
                return Err(Error::validation(format!("{label} '{value}' contains invalid characters"),),);
            }
        }

        Ok(Self {
            owner: owner.to_owned(), repository: repository.to_owned(),
        },)
    }

    /// API path prefix, `/repos/{owner}/{repository}`.
    pub fn api_path(&self,) -> String
    {
        format!("/repos/{}/{}", self.owner, self.repository)
    }
}

impl fmt::Display for RepositoryRef
{
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result
    {
        write!(f, "{}/{}", self.owner, self.repository)
    }
}

impl FromStr for RepositoryRef
{
    type Err = Error;

    fn from_str(value: &str,) -> Result<Self, Self::Err,>
    {
        let (owner, repository,) = value
            .split_once('/',)
            .ok_or_else(|| Error::validation(format!("expected OWNER/REPO, got '{value}'"),),)?;
        Self::new(owner, repository,)
    }
}

/// Account that contributed commits to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct Contributor
{
    pub login:         String,
    pub contributions: u64,
    pub avatar_url:    Option<String,>,
}

/// Issue enriched with its cross-references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
pub struct Issue
{
    pub number:        u64,
    pub title:         String,
    pub author:        String,
    pub state:         String,
    pub labels:        Vec<String,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body:          Option<String,>,
    pub created_at:    DateTime<Utc,>,
    pub updated_at:    DateTime<Utc,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url:      Option<String,>,
    pub linked_issues: BTreeSet<u64,>,
}

/// Pull request enriched with cross-references and changed files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
pub struct PullRequest
{
    pub number:        u64,
    pub title:         String,
    pub author:        String,
    pub state:         String,
    pub merged:        bool,
    pub draft:         bool,
    pub labels:        Vec<String,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body:          Option<String,>,
    pub created_at:    DateTime<Utc,>,
    pub updated_at:    DateTime<Utc,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url:      Option<String,>,
    pub linked_issues: BTreeSet<u64,>,
    pub files:         Vec<ChangedFile,>,
    #[serde(default)]
    pub comments:      Vec<Comment,>,
    #[serde(default)]
    pub reviews:       Vec<Review,>,
}

/// File touched by a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct ChangedFile
{
    pub filename:  String,
    /// Parent directory of `filename`, empty for files at the root.
    pub directory: String,
    pub status:    String,
    pub additions: u64,
    pub deletions: u64,
}

/// Conversation comment left on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct Comment
{
    pub id:         u64,
    pub author:     String,
    /// Comment text, cut to [`MAX_EXCERPT_CHARS`].
    pub body:       String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc,>,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url:   Option<String,>,
}

/// Review submitted on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct Review
{
    pub id:           u64,
    pub reviewer:     String,
    /// `APPROVED`, `CHANGES_REQUESTED`, `COMMENTED`, ...
    pub state:        String,
    pub body:         String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc,>,>,
}

/// Descriptive attributes of the repository itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct RepositoryMetadata
{
    pub name:        String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language:    Option<String,>,
    pub topics:      Vec<String,>,
    pub stars:       u64,
    pub forks:       u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url:    Option<String,>,
    pub archived:    bool,
}

/// Longest comment or review text kept in a record, in characters.
pub const MAX_EXCERPT_CHARS: usize = 500;

/// Issue or pull request addressed by its repository-wide number.
#[derive(Debug, Clone, PartialEq,)]
pub enum WorkItem
{
    Issue(Issue,),
    PullRequest(PullRequest,),
}

impl WorkItem
{
    /// Position of the item, unique within the repository.
    pub fn number(&self,) -> u64
    {
        match self {
            Self::Issue(issue,) => issue.number,
            Self::PullRequest(pull,) => pull.number,
        }
    }

    /// Last modification time reported by the API.
    pub fn updated_at(&self,) -> DateTime<Utc,>
    {
        match self {
            Self::Issue(issue,) => issue.updated_at,
            Self::PullRequest(pull,) => pull.updated_at,
        }
    }
}

#[derive(Debug, Deserialize,)]
struct RawUser
{
    login: String,
}

#[derive(Debug, Deserialize,)]
struct RawLabel
{
    name: String,
}

#[derive(Debug, Deserialize,)]
struct RawPullRef
{
    #[serde(default)]
    merged_at: Option<DateTime<Utc,>,>,
}

#[derive(Debug, Deserialize,)]
struct RawIssue
{
    number:       u64,
    title:        String,
    #[serde(default)]
    user:         Option<RawUser,>,
    state:        String,
    #[serde(default)]
    labels:       Vec<RawLabel,>,
    #[serde(default)]
    body:         Option<String,>,
    created_at:   DateTime<Utc,>,
    updated_at:   DateTime<Utc,>,
    #[serde(default)]
    html_url:     Option<String,>,
    #[serde(default)]
    draft:        Option<bool,>,
    #[serde(default)]
    pull_request: Option<RawPullRef,>,
}

#[derive(Debug, Deserialize,)]
struct RawContributor
{
    #[serde(default)]
    login:         Option<String,>,
    #[serde(default)]
    contributions: u64,
    #[serde(default)]
    avatar_url:    Option<String,>,
    #[serde(rename = "type", default)]
    account_type:  Option<String,>,
}

#[derive(Debug, Deserialize,)]
struct RawFile
{
    filename:  String,
    #[serde(default)]
    status:    String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
}

#[derive(Debug, Deserialize,)]
struct RawComment
{
    id:         u64,
    #[serde(default)]
    user:       Option<RawUser,>,
    #[serde(default)]
    body:       Option<String,>,
    #[serde(default)]
    created_at: Option<DateTime<Utc,>,>,
    #[serde(default)]
    html_url:   Option<String,>,
}

#[derive(Debug, Deserialize,)]
struct RawReview
{
    id:           u64,
    #[serde(default)]
    user:         Option<RawUser,>,
    #[serde(default)]
    state:        String,
    #[serde(default)]
    body:         Option<String,>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc,>,>,
}

#[derive(Debug, Deserialize,)]
struct RawRepository
{
    name:             String,
    #[serde(default)]
    description:      Option<String,>,
    #[serde(default)]
    language:         Option<String,>,
    #[serde(default)]
    topics:           Vec<String,>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count:      u64,
    #[serde(default)]
    html_url:         Option<String,>,
    #[serde(default)]
    archived:         bool,
}

fn excerpt(text: Option<String,>,) -> String
{
    let text = text.unwrap_or_default();
    match text.char_indices().nth(MAX_EXCERPT_CHARS,) {
        Some((cut, _,),) => text[..cut].to_owned(),
        None => text,
    }
}

fn login(user: Option<RawUser,>,) -> Option<String,>
{
    user.map(|user| user.login,).filter(|login| !login.is_empty(),)
}

/// Reads the `number` field without decoding the rest of the item.
pub fn item_number(value: &Value,) -> Option<u64,>
{
    value.get("number",).and_then(Value::as_u64,)
}

/// Decodes an element of the issues endpoint into an issue or pull request.
///
/// Enrichment fields (`linked_issues`, `files`) start empty.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] when required fields are missing or
/// mistyped, or when the item has no author.
pub fn decode_work_item(value: &Value,) -> Result<WorkItem, Error,>
{
    let raw: RawIssue = serde_json::from_value(value.clone(),).map_err(|e| {
        Error::malformed(format!("item {:?} could not be decoded: {e}", item_number(value)),)
    },)?;
    let author = login(raw.user,)
        .ok_or_else(|| Error::malformed(format!("item #{} has no author", raw.number),),)?;
    let labels = raw.labels.into_iter().map(|label| label.name,).collect();

    Ok(match raw.pull_request {
        Some(pull,) => WorkItem::PullRequest(PullRequest {
            number: raw.number,
            title: raw.title,
            author,
            state: raw.state,
            merged: pull.merged_at.is_some(),
            draft: raw.draft.unwrap_or(false,),
            labels,
            body: raw.body,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            html_url: raw.html_url,
            linked_issues: BTreeSet::new(),
            files: Vec::new(),
            comments: Vec::new(),
            reviews: Vec::new(),
        },),
        None => WorkItem::Issue(Issue {
            number: raw.number,
            title: raw.title,
            author,
            state: raw.state,
            labels,
            body: raw.body,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            html_url: raw.html_url,
            linked_issues: BTreeSet::new(),
        },),
    },)
}

/// Decodes a contributor entry, returning `None` for bot and anonymous
/// accounts.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] when the entry is not an object of
/// the expected shape.
pub fn decode_contributor(value: &Value,) -> Result<Option<Contributor,>, Error,>
{
    let raw: RawContributor = serde_json::from_value(value.clone(),)
        .map_err(|e| Error::malformed(format!("contributor could not be decoded: {e}"),),)?;

    if raw.account_type.as_deref() != Some("User",) {
        return Ok(None,);
    }
    let Some(login,) = raw.login.filter(|login| !login.is_empty(),) else {
        return Ok(None,);
    };

    Ok(Some(Contributor {
        login, contributions: raw.contributions, avatar_url: raw.avatar_url,
    },),)
}

/// Decodes an entry of the pull request files endpoint.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] when `filename` is missing.
pub fn decode_changed_file(value: &Value,) -> Result<ChangedFile, Error,>
{
    let raw: RawFile = serde_json::from_value(value.clone(),)
        .map_err(|e| Error::malformed(format!("changed file could not be decoded: {e}"),),)?;
    let directory = raw.filename.rsplit_once('/',).map(|(dir, _,)| dir.to_owned(),).unwrap_or_default();

    Ok(ChangedFile {
        filename: raw.filename,
        directory,
        status: raw.status,
        additions: raw.additions,
        deletions: raw.deletions,
    },)
}

/// Decodes a pull request comment, returning `None` for comments whose
/// author account was deleted.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] when `id` is missing or mistyped.
pub fn decode_comment(value: &Value,) -> Result<Option<Comment,>, Error,>
{
    let raw: RawComment = serde_json::from_value(value.clone(),)
        .map_err(|e| Error::malformed(format!("comment could not be decoded: {e}"),),)?;
    let Some(author,) = login(raw.user,) else {
        return Ok(None,);
    };

    Ok(Some(Comment {
        id: raw.id,
        author,
        body: excerpt(raw.body,),
        created_at: raw.created_at,
        html_url: raw.html_url,
    },),)
}

/// Decodes a pull request review, returning `None` for reviews whose author
/// account was deleted.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] when `id` is missing or mistyped.
pub fn decode_review(value: &Value,) -> Result<Option<Review,>, Error,>
{
    let raw: RawReview = serde_json::from_value(value.clone(),)
        .map_err(|e| Error::malformed(format!("review could not be decoded: {e}"),),)?;
    let Some(reviewer,) = login(raw.user,) else {
        return Ok(None,);
    };

    Ok(Some(Review {
        id: raw.id,
        reviewer,
        state: raw.state,
        body: excerpt(raw.body,),
        submitted_at: raw.submitted_at,
    },),)
}

/// Decodes the repository endpoint.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] when `name` is missing.
pub fn decode_repository_metadata(value: &Value,) -> Result<RepositoryMetadata, Error,>
{
    let raw: RawRepository = serde_json::from_value(value.clone(),)
        .map_err(|e| Error::malformed(format!("repository could not be decoded: {e}"),),)?;

    Ok(RepositoryMetadata {
        name:        raw.name,
        description: raw.description,
        language:    raw.language,
        topics:      raw.topics,
        stars:       raw.stargazers_count,
        forks:       raw.forks_count,
        html_url:    raw.html_url,
        archived:    raw.archived,
    },)
}
