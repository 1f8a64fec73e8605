// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Cross-reference extraction from issue and pull request bodies.

use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;

static REFERENCE: LazyLock<Option<Regex,>,> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:\b(?P<keyword>fix|fixes|fixed|close|closes|closed|resolve|resolves|resolved):?\s+)?#(?P<number>\d+)\b",
    )
    .ok()
},);

fn references(text: &str,) -> impl Iterator<Item = (u64, bool,),> + '_
{
    REFERENCE.iter().flat_map(|pattern| pattern.captures_iter(text,),).filter_map(|captures| {
        let number = captures.name("number",)?;
        let closing = match captures.name("keyword",) {
            Some(keyword,) => stands_alone(text, keyword.start(),),
            None if stands_alone(text, number.start() - 1,) => false,
            None => return None,
        };
        Some((number.as_str().parse::<u64>().ok()?, closing,),)
    },)
}

/// Whether the token starting at byte `at` is not glued to a word, a path or
/// an HTML entity. A directly preceding reference (`#3#4`) does not count
/// as glue.
fn stands_alone(text: &str, at: usize,) -> bool
{
    let before = &text[..at];
    let Some(last,) = before.chars().next_back() else {
        return true;
    };
    if !(last.is_alphanumeric() || matches!(last, '_' | '/' | '&')) {
        return true;
    }
    let rest = before.trim_end_matches(|c: char| c.is_ascii_digit(),);
    rest.len() < before.len() && rest.ends_with('#',) && stands_alone(text, rest.len() - 1,)
}

/// Collects every `#N` reference in `text`.
///
/// References inside URLs (`/issues#3`), cross-repository references
/// (`owner/repo#3`) and HTML entities (`&#39;`) are ignored, as are `#0` and
/// `own_number`.
///
/// # Examples
///
/// ```
/// use contrib_ingest::extract_linked_issues;
///
/// let linked = extract_linked_issues("Fixes #12 and relates to #7", 99,);
/// assert_eq!(linked.into_iter().collect::<Vec<_,>>(), vec![7, 12]);
/// assert!(extract_linked_issues("see #5", 5).is_empty());
/// ```
pub fn extract_linked_issues(text: &str, own_number: u64,) -> BTreeSet<u64,>
{
    references(text,)
        .map(|(number, _,)| number,)
        .filter(|number| *number != 0 && *number != own_number,)
        .collect()
}

/// Collects the references preceded by a closing keyword such as `fixes` or
/// `resolves`.
pub fn extract_closing_issues(text: &str, own_number: u64,) -> BTreeSet<u64,>
{
    references(text,)
        .filter(|(_, closing,)| *closing,)
        .map(|(number, _,)| number,)
        .filter(|number| *number != 0 && *number != own_number,)
        .collect()
}
