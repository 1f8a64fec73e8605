// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Structured views of well-known repository metadata files.
//!
//! Each file is optional: a missing or unreadable file leaves its field
//! empty and never fails the pass.

use std::collections::BTreeMap;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, client::ApiClient, clock::Clock, model::RepositoryRef, transport::Transport};

/// Locations searched for the ownership map, in priority order.
pub const OWNERSHIP_MAP_PATHS: [&str; 3] = ["CODEOWNERS", ".github/CODEOWNERS", "docs/CODEOWNERS",];
/// Locations searched for the contribution guide, in priority order.
pub const CONTRIBUTING_GUIDE_PATHS: [&str; 3] =
    ["CONTRIBUTING.md", ".github/CONTRIBUTING.md", "docs/CONTRIBUTING.md",];
/// Location of the package manifest.
pub const MANIFEST_PATH: &str = "package.json";

/// Pattern line of an ownership map.
#[derive(Debug, Clone, Serialize,)]
pub struct OwnershipRule
{
    pub pattern: String,
    /// Owners without the leading `@`; empty when the rule removes
    /// ownership.
    pub owners:  Vec<String,>,
    #[serde(skip)]
    matcher:     GlobSet,
}

impl OwnershipRule
{
    pub fn matches(&self, path: &str,) -> bool
    {
        self.matcher.is_match(path.trim_start_matches('/',),)
    }
}

/// Parsed ownership map. Later rules take precedence over earlier ones.
#[derive(Debug, Clone, Serialize,)]
pub struct OwnershipMap
{
    pub path:  String,
    pub rules: Vec<OwnershipRule,>,
}

impl OwnershipMap
{
    /// Parses ownership map `content` read from `path`.
    ///
    /// Blank lines and comments are ignored. Lines whose pattern cannot be
    /// compiled are skipped with a warning.
    ///
    /// # Examples
    ///
    /// ```
    /// use contrib_ingest::OwnershipMap;
    ///
    /// let map = OwnershipMap::parse("CODEOWNERS", "*.ts @alice\nsrc/*.ts @bob\n",);
    /// assert_eq!(map.owners_for("src/app.ts"), Some(&["bob".to_owned()][..]));
    /// assert_eq!(map.owners_for("web/app.ts"), Some(&["alice".to_owned()][..]));
    /// ```
    pub fn parse(path: &str, content: &str,) -> Self
    {
        let mut rules = Vec::new();
        for (index, line,) in content.lines().enumerate() {
            let mut tokens = line.split_whitespace().take_while(|token| !token.starts_with('#',),);
            let Some(pattern,) = tokens.next() else {
                continue;
            };
            let owners = tokens.filter_map(normalize_owner,).collect();
            match compile_pattern(pattern,) {
                Ok(matcher,) => rules.push(OwnershipRule {
                    pattern: pattern.to_owned(),
                    owners,
                    matcher,
                },),
                Err(error,) => {
                    warn!(path, line = index + 1, pattern, "skipping ownership rule: {}", error);
                }
            }
        }

        Self {
            path: path.to_owned(), rules,
        }
    }

    /// Owners of `path` according to the last matching rule, `None` when no
    /// rule matches.
    pub fn owners_for(&self, path: &str,) -> Option<&[String],>
    {
        self.rules.iter().rev().find(|rule| rule.matches(path,),).map(|rule| rule.owners.as_slice(),)
    }
}

fn normalize_owner(token: &str,) -> Option<String,>
{
    match token.strip_prefix('@',) {
        Some(handle,) if !handle.is_empty() => Some(handle.to_owned(),),
        Some(_,) => None,
        None if token.contains('@',) => Some(token.to_owned(),),
        None => {
            debug!(token, "ignoring ownership token that is neither a handle nor an email");
            None
        }
    }
}

/// Translates an ownership pattern into globs matched against
/// root-relative paths.
fn pattern_globs(pattern: &str,) -> Vec<String,>
{
    let anchored = pattern.starts_with('/',);
    let directory_only = pattern.ends_with('/',);
    let body = pattern.trim_start_matches('/',).trim_end_matches('/',);
    if body.is_empty() {
        return vec!["**".to_owned()];
    }

    let base = if anchored || body.contains('/',) { body.to_owned() } else { format!("**/{body}") };
    let last_segment = body.rsplit('/',).next().unwrap_or(body,);
    let literal_tail = !last_segment.contains(['*', '?', '[',],);

    let mut globs = Vec::with_capacity(2,);
    if !directory_only {
        globs.push(base.clone(),);
    }
    if directory_only || literal_tail {
        globs.push(format!("{base}/**"),);
    }
    globs
}

fn compile_pattern(pattern: &str,) -> Result<GlobSet, globset::Error,>
{
    let mut builder = GlobSetBuilder::new();
    for glob in pattern_globs(pattern,) {
        builder.add(GlobBuilder::new(&glob,).literal_separator(true,).build()?,);
    }
    builder.build()
}

/// Contribution guide with its body split by Markdown heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
pub struct ContributingGuide
{
    pub path:     String,
    pub content:  String,
    /// Heading text mapped to the text below it up to the next heading.
    pub sections: BTreeMap<String, String,>,
}

impl ContributingGuide
{
    pub fn parse(path: &str, content: &str,) -> Self
    {
        let mut sections: BTreeMap<String, String,> = BTreeMap::new();
        let mut current: Option<(String, Vec<&str,>,),> = None;
        let mut in_fence = false;

        for line in content.lines() {
            if line.trim_start().starts_with("```",) {
                in_fence = !in_fence;
            }
            let heading = (!in_fence).then(|| markdown_heading(line,),).flatten();
            match heading {
                Some(title,) => {
                    if let Some((title, body,),) = current.take() {
                        insert_section(&mut sections, title, &body,);
                    }
                    current = Some((title.to_owned(), Vec::new(),),);
                }
                None => {
                    if let Some((_, body,),) = current.as_mut() {
                        body.push(line,);
                    }
                }
            }
        }
        if let Some((title, body,),) = current {
            insert_section(&mut sections, title, &body,);
        }

        Self {
            path: path.to_owned(), content: content.to_owned(), sections,
        }
    }
}

fn markdown_heading(line: &str,) -> Option<&str,>
{
    let hashes = line.chars().take_while(|c| *c == '#',).count();
    if !(1..=6).contains(&hashes,) {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ',) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#',).trim();
    (!title.is_empty()).then_some(title,)
}

fn insert_section(sections: &mut BTreeMap<String, String,>, title: String, body: &[&str],)
{
    let text = body.join("\n",).trim().to_owned();
    sections
        .entry(title,)
        .and_modify(|existing| {
            if !text.is_empty() {
                if !existing.is_empty() {
                    existing.push_str("\n\n",);
                }
                existing.push_str(&text,);
            }
        },)
        .or_insert_with(|| text.clone(),);
}

/// Package manifest fields relevant to contributors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize,)]
pub struct Manifest
{
    pub name:             Option<String,>,
    pub version:          Option<String,>,
    pub description:      Option<String,>,
    pub dependencies:     BTreeMap<String, String,>,
    pub dev_dependencies: BTreeMap<String, String,>,
    pub scripts:          BTreeMap<String, String,>,
}

#[derive(Debug, Deserialize,)]
struct RawManifest
{
    #[serde(default)]
    name:             Option<String,>,
    #[serde(default)]
    version:          Option<String,>,
    #[serde(default)]
    description:      Option<String,>,
    #[serde(default)]
    dependencies:     BTreeMap<String, String,>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String,>,
    #[serde(default)]
    scripts:          BTreeMap<String, String,>,
}

impl Manifest
{
    /// Parses a `package.json` document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] when the document is not a JSON
    /// object of the expected shape.
    pub fn parse(content: &str,) -> Result<Self, Error,>
    {
        let raw: RawManifest = serde_json::from_str(content,)
            .map_err(|e| Error::malformed(format!("{MANIFEST_PATH} could not be parsed: {e}"),),)?;
        Ok(Self {
            name:             raw.name,
            version:          raw.version,
            description:      raw.description,
            dependencies:     raw.dependencies,
            dev_dependencies: raw.dev_dependencies,
            scripts:          raw.scripts,
        },)
    }
}

/// Special files found in a repository.
#[derive(Debug, Clone, Default, Serialize,)]
#[serde(rename_all = "camelCase")]
pub struct SpecialFiles
{
    pub ownership_map:      Option<OwnershipMap,>,
    pub contributing_guide: Option<ContributingGuide,>,
    pub manifest:           Option<Manifest,>,
}

/// Fetches and parses the special files of `repo`.
///
/// # Errors
///
/// Propagates [`Error::FatalAuth`] and [`Error::TransientFetch`]. Missing
/// and unparsable files leave the corresponding field empty.
pub async fn parse_special_files<T: Transport, C: Clock,>(
    client: &ApiClient<T, C,>,
    repo: &RepositoryRef,
) -> Result<SpecialFiles, Error,>
{
    let ownership_map = first_file(client, repo, &OWNERSHIP_MAP_PATHS,)
        .await?
        .map(|(path, content,)| OwnershipMap::parse(path, &content,),);
    let contributing_guide = first_file(client, repo, &CONTRIBUTING_GUIDE_PATHS,)
        .await?
        .map(|(path, content,)| ContributingGuide::parse(path, &content,),);
    let manifest = first_file(client, repo, &[MANIFEST_PATH,],).await?.and_then(|(_, content,)| {
        Manifest::parse(&content,)
            .inspect_err(|error| warn!(repository = %repo, "ignoring manifest: {}", error),)
            .ok()
    },);

    debug!(
        repository = %repo,
        ownership_map = ownership_map.is_some(),
        contributing_guide = contributing_guide.is_some(),
        manifest = manifest.is_some(),
        "special files parsed"
    );

    Ok(SpecialFiles {
        ownership_map, contributing_guide, manifest,
    },)
}

async fn first_file<'p, T: Transport, C: Clock,>(
    client: &ApiClient<T, C,>,
    repo: &RepositoryRef,
    paths: &[&'p str],
) -> Result<Option<(&'p str, String,),>, Error,>
{
    for path in paths {
        match client.file_content(repo, path,).await {
            Ok(Some(content,),) => return Ok(Some((*path, content,),),),
            Ok(None,) => {}
            Err(Error::MalformedResponse {
                message,
            },) => warn!(repository = %repo, path, "ignoring unreadable file: {}", message),
            Err(error,) => return Err(error,),
        }
    }
    Ok(None,)
}
