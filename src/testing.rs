// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Simulated clock and transports shared by unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use base64::Engine;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Value, json};

use crate::{
    Error,
    clock::Clock,
    transport::{RawResponse, ResponseHeaders, Transport},
};

#[derive(Debug,)]
struct ClockState
{
    now:   DateTime<Utc,>,
    slept: Duration,
}

/// Virtual clock whose sleeps complete instantly and advance time.
#[derive(Debug, Clone,)]
pub struct FakeClock
{
    state: Arc<Mutex<ClockState,>,>,
}

impl FakeClock
{
    pub fn at(now: DateTime<Utc,>,) -> Self
    {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now, slept: Duration::ZERO,
            },),),
        }
    }

    pub fn advance(&self, by: chrono::Duration,)
    {
        self.state.lock().unwrap().now += by;
    }

    pub fn total_slept(&self,) -> Duration
    {
        self.state.lock().unwrap().slept
    }
}

impl Clock for FakeClock
{
    fn now(&self,) -> DateTime<Utc,>
    {
        self.state.lock().unwrap().now
    }

    async fn sleep(&self, duration: Duration,)
    {
        let mut state = self.state.lock().unwrap();
        state.now += chrono::Duration::from_std(duration,).expect("sleep fits in chrono range",);
        state.slept += duration;
    }
}

pub fn epoch() -> DateTime<Utc,>
{
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0,).single().expect("valid date",)
}

pub fn ok_json(body: Value,) -> RawResponse
{
    RawResponse {
        status: 200, headers: ResponseHeaders::default(), body: body.to_string(),
    }
}

pub fn status(code: u16, headers: ResponseHeaders,) -> RawResponse
{
    RawResponse {
        status: code, headers, body: json!({ "message": "scripted" }).to_string(),
    }
}

/// Transport replaying a fixed sequence of responses.
pub struct ScriptedTransport
{
    clock:     FakeClock,
    responses: Mutex<VecDeque<Result<RawResponse, Error,>,>,>,
    requests:  Mutex<Vec<(String, DateTime<Utc,>,),>,>,
}

impl ScriptedTransport
{
    pub fn new(clock: FakeClock, responses: Vec<Result<RawResponse, Error,>,>,) -> Self
    {
        Self {
            clock,
            responses: Mutex::new(responses.into(),),
            requests: Mutex::new(Vec::new(),),
        }
    }

    pub fn requests(&self,) -> Vec<(String, DateTime<Utc,>,),>
    {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport
{
    async fn get(&self, url: &str,) -> Result<RawResponse, Error,>
    {
        self.requests.lock().unwrap().push((url.to_owned(), self.clock.now(),),);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::transient(format!("no scripted response for {url}"),),),)
    }

    fn is_authenticated(&self,) -> bool
    {
        true
    }
}

/// One issue or pull request served by [`FakeGitHub`].
#[derive(Debug, Clone,)]
pub struct FakeItem
{
    pub number:       u64,
    pub pull_request: bool,
    pub updated_at:   DateTime<Utc,>,
    pub body:         String,
    pub author:       Option<String,>,
    pub malformed:    bool,
}

impl FakeItem
{
    pub fn issue(number: u64,) -> Self
    {
        Self {
            number,
            pull_request: false,
            updated_at: epoch() + chrono::Duration::hours(number as i64,),
            body: String::new(),
            author: Some(format!("author{}", number % 3),),
            malformed: false,
        }
    }

    pub fn pull_request(number: u64,) -> Self
    {
        Self {
            pull_request: true, ..Self::issue(number,)
        }
    }

    pub fn with_body(mut self, body: &str,) -> Self
    {
        self.body = body.to_owned();
        self
    }

    pub fn updated(mut self, at: DateTime<Utc,>,) -> Self
    {
        self.updated_at = at;
        self
    }

    pub fn to_json(&self,) -> Value
    {
        if self.malformed {
            return json!({ "number": self.number, "title": 17 });
        }
        let mut value = json!({
            "number": self.number,
            "title": format!("Item {}", self.number),
            "user": self.author.as_ref().map(|login| json!({ "login": login })),
            "state": "open",
            "labels": [{ "name": "triage" }],
            "body": self.body,
            "created_at": (epoch() + chrono::Duration::minutes(self.number as i64)).to_rfc3339_opts(SecondsFormat::Secs, true),
            "updated_at": self.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "html_url": format!("https://github.com/acme/widgets/issues/{}", self.number),
        });
        if self.pull_request {
            value["pull_request"] = json!({ "merged_at": null });
            value["draft"] = json!(false);
        }
        value
    }
}

struct Injection
{
    pattern:   String,
    remaining: usize,
    response:  Result<RawResponse, Error,>,
}

/// In-memory stand-in for the GitHub REST API of a single repository.
///
/// Every request advances the shared clock by `request_cost`, so deadlines
/// elapse as the walk progresses.
pub struct FakeGitHub
{
    clock:        FakeClock,
    request_cost: chrono::Duration,
    items:        Vec<FakeItem,>,
    contributors: Vec<Value,>,
    files:        HashMap<String, String,>,
    injections:   Mutex<Vec<Injection,>,>,
    requests:     Mutex<Vec<(String, DateTime<Utc,>,),>,>,
}

impl FakeGitHub
{
    pub fn new(clock: FakeClock, items: Vec<FakeItem,>,) -> Self
    {
        Self {
            clock,
            request_cost: chrono::Duration::seconds(1,),
            items,
            contributors: vec![
                json!({ "login": "alice", "contributions": 40, "avatar_url": "https://a", "type": "User" }),
                json!({ "login": "dependabot[bot]", "contributions": 12, "avatar_url": "https://b", "type": "Bot" }),
                json!({ "login": "bob", "contributions": 3, "avatar_url": "https://c", "type": "User" }),
            ],
            files: HashMap::new(),
            injections: Mutex::new(Vec::new(),),
            requests: Mutex::new(Vec::new(),),
        }
    }

    pub fn with_request_cost(mut self, cost: chrono::Duration,) -> Self
    {
        self.request_cost = cost;
        self
    }

    pub fn with_file(mut self, path: &str, content: &str,) -> Self
    {
        self.files.insert(path.to_owned(), content.to_owned(),);
        self
    }

    pub fn with_malformed(mut self, number: u64,) -> Self
    {
        for item in &mut self.items {
            if item.number == number {
                item.malformed = true;
            }
        }
        self
    }

    /// Answers the next `times` requests whose URL contains `pattern` with
    /// `response` instead of the simulated data.
    pub fn inject(&self, pattern: &str, times: usize, response: Result<RawResponse, Error,>,)
    {
        self.injections.lock().unwrap().push(Injection {
            pattern: pattern.to_owned(),
            remaining: times,
            response,
        },);
    }

    pub fn clear_injections(&self,)
    {
        self.injections.lock().unwrap().clear();
    }

    pub fn requests(&self,) -> Vec<(String, DateTime<Utc,>,),>
    {
        self.requests.lock().unwrap().clone()
    }

    fn injected(&self, url: &str,) -> Option<Result<RawResponse, Error,>,>
    {
        let mut injections = self.injections.lock().unwrap();
        let injection = injections
            .iter_mut()
            .find(|candidate| candidate.remaining > 0 && url.contains(&candidate.pattern,),)?;
        injection.remaining -= 1;
        Some(match &injection.response {
            Ok(response,) => Ok(response.clone(),),
            Err(error,) => Err(Error::transient(error.to_string(),),),
        },)
    }

    fn serve(&self, url: &str,) -> RawResponse
    {
        let (path, query,) = url.split_once('?',).unwrap_or((url, "",),);
        let params: HashMap<&str, &str,> =
            query.split('&',).filter_map(|pair| pair.split_once('=',),).collect();
        let per_page = params.get("per_page",).and_then(|v| v.parse().ok(),).unwrap_or(30usize,);
        let page = params.get("page",).and_then(|v| v.parse().ok(),).unwrap_or(1usize,);

        if let Some(file,) = path.split_once("/contents/",).map(|(_, file,)| file,) {
            return match self.files.get(file,) {
                Some(content,) => ok_json(json!({
                    "path": file,
                    "encoding": "base64",
                    "content": base64::engine::general_purpose::STANDARD.encode(content),
                }),),
                None => status(404, ResponseHeaders::default(),),
            };
        }

        if path.ends_with("/files",) {
            let number = path.rsplit('/',).nth(1,).unwrap_or("0",);
            return ok_json(json!([{
                "filename": format!("src/module{number}/lib.rs"),
                "status": "modified",
                "additions": 3,
                "deletions": 1,
            }]),);
        }

        if path.ends_with("/comments",) {
            let number = path.rsplit('/',).nth(1,).unwrap_or("0",);
            return ok_json(json!([
                { "id": 1, "user": { "login": "alice" }, "body": format!("comment on {number}"), "created_at": "2024-01-02T00:00:00Z" },
                { "id": 2, "user": null, "body": "left by a deleted account" },
            ]),);
        }

        if path.ends_with("/reviews",) {
            return ok_json(json!([
                { "id": 3, "user": { "login": "bob" }, "state": "APPROVED", "body": "ship it", "submitted_at": "2024-01-02T01:00:00Z" },
            ]),);
        }

        if path.trim_start_matches('/',).split('/',).count() == 3 {
            return ok_json(json!({
                "name": path.rsplit('/',).next().unwrap_or_default(),
                "description": "Simulated repository",
                "language": "Rust",
                "topics": ["simulation"],
                "stargazers_count": 42,
                "forks_count": 7,
                "archived": false,
            }),);
        }

        let values: Vec<Value,> = if path.ends_with("/contributors",) {
            self.contributors.clone()
        } else if path.ends_with("/issues",) {
            let since = params
                .get("since",)
                .and_then(|v| DateTime::parse_from_rfc3339(v,).ok(),)
                .map(|v| v.with_timezone(&Utc,),);
            let mut items: Vec<&FakeItem,> = self
                .items
                .iter()
                .filter(|item| since.is_none_or(|since| item.updated_at >= since,),)
                .collect();
            if params.get("sort",) == Some(&"updated",) {
                items.sort_by_key(|item| (item.updated_at, item.number,),);
                if params.get("direction",) == Some(&"desc",) {
                    items.reverse();
                }
            } else {
                items.sort_by(|a, b| b.number.cmp(&a.number,),);
            }
            items.into_iter().map(FakeItem::to_json,).collect()
        } else {
            return status(404, ResponseHeaders::default(),);
        };

        let start = (page - 1) * per_page;
        let chunk: Vec<Value,> = values.iter().skip(start,).take(per_page,).cloned().collect();
        let has_next = start + per_page < values.len();
        let link = has_next.then(|| {
            let next_query: Vec<String,> = query
                .split('&',)
                .map(|pair| match pair.split_once('=',) {
                    Some(("page", _,),) => format!("page={}", page + 1),
                    _ => pair.to_owned(),
                },)
                .collect();
            format!("<{path}?{}>; rel=\"next\"", next_query.join("&"))
        },);

        let count = self.requests.lock().unwrap().len() as u32;
        RawResponse {
            status:  200,
            headers: ResponseHeaders {
                rate_limit_limit: Some(5000,),
                rate_limit_remaining: Some(5000u32.saturating_sub(count,),),
                rate_limit_reset: Some((self.clock.now() + chrono::Duration::hours(1,)).timestamp(),),
                retry_after: None,
                link,
            },
            body:    Value::Array(chunk,).to_string(),
        }
    }
}

impl Transport for FakeGitHub
{
    async fn get(&self, url: &str,) -> Result<RawResponse, Error,>
    {
        self.requests.lock().unwrap().push((url.to_owned(), self.clock.now(),),);
        self.clock.advance(self.request_cost,);
        if let Some(response,) = self.injected(url,) {
            return response;
        }
        Ok(self.serve(url,),)
    }

    fn is_authenticated(&self,) -> bool
    {
        true
    }
}
