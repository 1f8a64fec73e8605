// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Raw HTTP access to the GitHub REST API.
//!
//! The client needs status codes and quota headers that the typed octocrab
//! handlers hide, so requests go through octocrab's raw `_get` and come back
//! as a [`RawResponse`]. Connection-level failures surface as
//! [`Error::TransientFetch`].

use std::{future::Future, sync::Arc};

use octocrab::Octocrab;
use tracing::debug;

use crate::Error;

/// Quota and pagination headers extracted from a response.
#[derive(Debug, Clone, Default, PartialEq, Eq,)]
pub struct ResponseHeaders
{
    /// `X-RateLimit-Limit`.
    pub rate_limit_limit:     Option<u32,>,
    /// `X-RateLimit-Remaining`.
    pub rate_limit_remaining: Option<u32,>,
    /// `X-RateLimit-Reset`, seconds since the Unix epoch.
    pub rate_limit_reset:     Option<i64,>,
    /// `Retry-After`, in seconds.
    pub retry_after:          Option<u64,>,
    /// `Link`, carrying the `rel="next"` page URL.
    pub link:                 Option<String,>,
}

/// Status, headers, and body of one HTTP exchange.
#[derive(Debug, Clone,)]
pub struct RawResponse
{
    pub status:  u16,
    pub headers: ResponseHeaders,
    pub body:    String,
}

/// Sends GET requests to the hosting API.
pub trait Transport: Send + Sync
{
    /// Issues a GET for `url`, either a path relative to the API root or an
    /// absolute URL taken from a `Link` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransientFetch`] when no HTTP response was obtained.
    fn get(&self, url: &str,) -> impl Future<Output = Result<RawResponse, Error,>,> + Send;

    /// Whether requests carry a credential.
    fn is_authenticated(&self,) -> bool;
}

impl<T: Transport,> Transport for Arc<T,>
{
    fn get(&self, url: &str,) -> impl Future<Output = Result<RawResponse, Error,>,> + Send
    {
        (**self).get(url,)
    }

    fn is_authenticated(&self,) -> bool
    {
        (**self).is_authenticated()
    }
}

/// Production transport backed by [`Octocrab`].
#[derive(Debug, Clone,)]
pub struct OctocrabTransport
{
    octocrab:      Octocrab,
    authenticated: bool,
}

impl OctocrabTransport
{
    /// Builds a transport, falling back to anonymous access without a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FatalAuth`] when the client cannot be initialized.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use contrib_ingest::OctocrabTransport;
    ///
    /// # fn example() -> Result<(), contrib_ingest::Error> {
    /// let token = std::env::var("GITHUB_TOKEN",).ok();
    /// let transport = OctocrabTransport::new(token.as_deref(),)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(token: Option<&str,>,) -> Result<Self, Error,>
    {
        let token = token.map(str::trim,).filter(|value| !value.is_empty(),);
        let built = match token {
            Some(token,) => Octocrab::builder().personal_token(token,).build(),
            None => Octocrab::builder().build(),
        };
        let octocrab = built.map_err(|e| {
            Error::fatal_auth(format!("failed to initialize GitHub client: {e}"),)
        },)?;

        Ok(Self {
            octocrab, authenticated: token.is_some(),
        },)
    }
}

impl Transport for OctocrabTransport
{
    async fn get(&self, url: &str,) -> Result<RawResponse, Error,>
    {
        debug!("GET {}", url);
        let response = self
            .octocrab
            ._get(url.to_owned(),)
            .await
            .map_err(|e| Error::transient(format!("request to {url} failed: {e}"),),)?;

        let headers = {
            let header = |name: &str| {
                response
                    .headers()
                    .get(name,)
                    .and_then(|value| value.to_str().ok(),)
                    .map(|value| value.trim().to_owned(),)
            };
            ResponseHeaders {
                rate_limit_limit:     header("x-ratelimit-limit",).and_then(|v| v.parse().ok(),),
                rate_limit_remaining: header("x-ratelimit-remaining",)
                    .and_then(|v| v.parse().ok(),),
                rate_limit_reset:     header("x-ratelimit-reset",).and_then(|v| v.parse().ok(),),
                retry_after:          header("retry-after",).and_then(|v| v.parse().ok(),),
                link:                 header("link",),
            }
        };
        let status = response.status().as_u16();

        let body = self
            .octocrab
            .body_to_string(response,)
            .await
            .map_err(|e| Error::transient(format!("failed to read body of {url}: {e}"),),)?;

        Ok(RawResponse {
            status, headers, body,
        },)
    }

    fn is_authenticated(&self,) -> bool
    {
        self.authenticated
    }
}

/// Extracts the `rel="next"` URL from a `Link` header.
///
/// # Examples
///
/// ```
/// use contrib_ingest::parse_next_link;
///
/// let header = r#"<https://api.github.com/repositories/1/issues?page=2>; rel="next", <https://api.github.com/repositories/1/issues?page=5>; rel="last""#;
/// assert_eq!(
///     parse_next_link(header,).as_deref(),
///     Some("https://api.github.com/repositories/1/issues?page=2")
/// );
/// ```
pub fn parse_next_link(header: &str,) -> Option<String,>
{
    header.split(',',).find_map(|link| {
        let mut parts = link.split(';',);
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        },);
        if !is_next {
            return None;
        }
        let url = target.strip_prefix('<',)?.strip_suffix('>',)?;
        (!url.is_empty()).then(|| url.to_owned(),)
    },)
}
