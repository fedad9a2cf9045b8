//! Account extraction from export documents.
//!
//! Exports are not a stable format. An [`Extractor`] therefore runs an
//! ordered chain of structural strategies over the parsed document and keeps
//! the first one that produces at least one usable account:
//!
//! 1. JSON records carrying `string_list_data` (Instagram JSON exports)
//! 2. JSON records carrying `userLink` (X archive `window.YTD.*` files)
//! 3. HTML elements with a tabular role
//! 4. HTML elements with a known export class
//! 5. HTML anchors linking to a profile
//!
//! When every structural strategy comes up empty, [`TextScanStrategy`] scans
//! the document text for username-shaped tokens.

use crate::chunked::ChunkScheduler;
use crate::model::{Account, ListKind, username_key};
use crate::sanitize::{
    DEFAULT_PROFILE_BASE_URL, is_absolute_http, profile_url, sanitize_username, username_from_link,
};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

/// Class tokens found on per-account containers in HTML exports.
pub const KNOWN_EXPORT_CLASSES: &[&str] = &["_a6-g", "uiBoxWhite", "_3-95"];

/// Hosts whose links are treated as profile links.
pub const DEFAULT_PROFILE_HOSTS: &[&str] = &[
    "instagram.com",
    "www.instagram.com",
    "x.com",
    "twitter.com",
    "mobile.twitter.com",
    "threads.net",
    "www.threads.net",
];

/// Tokens the text scan never accepts as usernames.
const STOP_WORDS: &[&str] = &[
    "followers", "following", "follower", "follow", "html", "http", "https", "www", "com",
    "instagram", "twitter", "threads", "the", "and", "you", "your", "for", "with", "from", "this",
    "that", "are", "was", "has", "have", "not", "who", "list", "accounts", "account", "profile",
    "username", "usernames", "name", "data", "json", "null", "true", "false", "value", "title",
    "href", "timestamp", "string_list_data", "relationships_followers", "relationships_following",
    "window", "ytd", "div", "class", "span", "table", "jan", "feb", "mar", "apr", "may", "jun",
    "jul", "aug", "sep", "sept", "oct", "nov", "dec", "am", "pm", "utc",
];

/// Suffixes marking a token as a file or domain name rather than a username.
const NON_USERNAME_SUFFIXES: &[&str] = &[".com", ".net", ".org", ".html", ".htm", ".json", ".js"];

static USERNAME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@?[A-Za-z0-9_.]{1,30}").expect("Invalid username token regex"));

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[role='row'], tr").expect("Invalid row selector"));
static HEADER_CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("th, [role='columnheader']").expect("Invalid header cell selector")
});
static CLASSED_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[class]").expect("Invalid class selector"));
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Invalid link selector"));
static TIME_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[datetime], [data-timestamp], [data-time], [data-utime]")
        .expect("Invalid time selector")
});

const TIME_ATTRIBUTES: &[&str] = &["datetime", "data-timestamp", "data-time", "data-utime"];

// =============================================================================
// Documents and candidates
// =============================================================================

/// An export document parsed into the shape strategies work on.
pub enum ExportDocument {
    Html(Html),
    Json(Value),
    Text(String),
}

impl ExportDocument {
    /// Parse document text. Never fails: unrecognized input stays [`Self::Text`].
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim_start_matches('\u{feff}').trim();

        if let Some(json) = strip_js_assignment(trimmed) {
            match serde_json::from_str(json) {
                Ok(value) => return Self::Json(value),
                Err(e) => debug!(error = %e, "JS-wrapped document is not valid JSON"),
            }
        }
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str(trimmed) {
                return Self::Json(value);
            }
        }
        if trimmed.contains('<') && trimmed.contains('>') {
            return Self::Html(Html::parse_document(trimmed));
        }
        Self::Text(trimmed.to_string())
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Html(_) => "html",
            Self::Json(_) => "json",
            Self::Text(_) => "text",
        }
    }

    /// Human-visible text: HTML text nodes, JSON string values, or the raw text.
    #[must_use]
    pub fn text_content(&self) -> String {
        match self {
            Self::Html(html) => html
                .root_element()
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Json(value) => {
                let mut out = Vec::new();
                collect_json_strings(value, &mut out);
                out.join("\n")
            }
            Self::Text(text) => text.clone(),
        }
    }
}

/// X archives wrap JSON as `window.YTD.<type>.part<n> = [...]`.
fn strip_js_assignment(content: &str) -> Option<&str> {
    if !content.starts_with("window.") {
        return None;
    }
    let pos = content
        .find(" = ")
        .map(|p| p + 3)
        .or_else(|| content.find('=').map(|p| p + 1))?;
    Some(content[pos..].trim().trim_end_matches(';'))
}

fn collect_json_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_json_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_json_strings(v, out)),
        _ => {}
    }
}

/// Raw material for one account before sanitization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub link: Option<String>,
    pub label: Option<String>,
    pub timestamp: Option<String>,
}

/// One way of locating account candidates in a document.
pub trait ExtractionStrategy {
    fn name(&self) -> &'static str;

    /// Candidates found, or an empty list when the document has no such structure.
    fn candidates(&self, doc: &ExportDocument) -> Vec<Candidate>;
}

// =============================================================================
// JSON strategies
// =============================================================================

/// Objects with a `string_list_data` array of `{href, value, timestamp}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStringListStrategy;

impl JsonStringListStrategy {
    fn walk(value: &Value, out: &mut Vec<Candidate>) {
        match value {
            Value::Array(items) => items.iter().for_each(|v| Self::walk(v, out)),
            Value::Object(map) => {
                if let Some(entries) = map.get("string_list_data").and_then(Value::as_array) {
                    let title = map.get("title").and_then(Value::as_str);
                    for entry in entries {
                        out.push(Candidate {
                            link: entry["href"].as_str().map(String::from),
                            label: entry["value"]
                                .as_str()
                                .filter(|s| !s.is_empty())
                                .or_else(|| title.filter(|t| !t.is_empty()))
                                .map(String::from),
                            timestamp: json_timestamp(&entry["timestamp"]),
                        });
                    }
                } else {
                    map.values().for_each(|v| Self::walk(v, out));
                }
            }
            _ => {}
        }
    }
}

impl ExtractionStrategy for JsonStringListStrategy {
    fn name(&self) -> &'static str {
        "json-string-list"
    }

    fn candidates(&self, doc: &ExportDocument) -> Vec<Candidate> {
        let ExportDocument::Json(value) = doc else {
            return Vec::new();
        };
        let mut out = Vec::new();
        Self::walk(value, &mut out);
        out
    }
}

/// Objects with a `userLink` (and usually an `accountId`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonUserLinkStrategy;

impl JsonUserLinkStrategy {
    fn walk(value: &Value, out: &mut Vec<Candidate>) {
        match value {
            Value::Array(items) => items.iter().for_each(|v| Self::walk(v, out)),
            Value::Object(map) => {
                if map.contains_key("userLink") || map.contains_key("accountId") {
                    let label = ["screenName", "username", "accountId"]
                        .iter()
                        .find_map(|k| map.get(*k).and_then(Value::as_str))
                        .map(String::from);
                    out.push(Candidate {
                        link: map.get("userLink").and_then(Value::as_str).map(String::from),
                        label,
                        timestamp: map.get("timestamp").and_then(json_timestamp),
                    });
                } else {
                    map.values().for_each(|v| Self::walk(v, out));
                }
            }
            _ => {}
        }
    }
}

impl ExtractionStrategy for JsonUserLinkStrategy {
    fn name(&self) -> &'static str {
        "json-user-link"
    }

    fn candidates(&self, doc: &ExportDocument) -> Vec<Candidate> {
        let ExportDocument::Json(value) = doc else {
            return Vec::new();
        };
        let mut out = Vec::new();
        Self::walk(value, &mut out);
        out
    }
}

// =============================================================================
// HTML strategies
// =============================================================================

/// Rows of tables or `role="row"` grids, header rows excluded.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableRowStrategy;

impl ExtractionStrategy for TableRowStrategy {
    fn name(&self) -> &'static str {
        "table-row"
    }

    fn candidates(&self, doc: &ExportDocument) -> Vec<Candidate> {
        let ExportDocument::Html(html) = doc else {
            return Vec::new();
        };
        html.select(&ROW_SELECTOR)
            .filter(|row| row.select(&HEADER_CELL_SELECTOR).next().is_none())
            .map(candidate_from_container)
            .collect()
    }
}

/// Elements whose class list carries one of [`KNOWN_EXPORT_CLASSES`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportClassStrategy;

impl ExtractionStrategy for ExportClassStrategy {
    fn name(&self) -> &'static str {
        "export-class"
    }

    fn candidates(&self, doc: &ExportDocument) -> Vec<Candidate> {
        let ExportDocument::Html(html) = doc else {
            return Vec::new();
        };
        html.select(&CLASSED_SELECTOR)
            .filter(|el| {
                el.value()
                    .classes()
                    .any(|c| KNOWN_EXPORT_CLASSES.contains(&c))
            })
            .map(candidate_from_container)
            .collect()
    }
}

/// Anchors pointing at a profile on one of the configured hosts, or relative ones.
#[derive(Debug, Clone)]
pub struct ProfileAnchorStrategy {
    hosts: HashSet<String>,
}

impl ProfileAnchorStrategy {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| {
                    let host: String = h.into();
                    host.to_lowercase()
                })
                .collect(),
        }
    }

    fn is_profile_href(&self, href: &str) -> bool {
        if href.starts_with('/') && !href.starts_with("//") {
            return true;
        }
        Url::parse(href)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .is_some_and(|host| self.hosts.contains(&host))
    }
}

impl Default for ProfileAnchorStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_PROFILE_HOSTS.iter().copied())
    }
}

impl ExtractionStrategy for ProfileAnchorStrategy {
    fn name(&self) -> &'static str {
        "profile-anchor"
    }

    fn candidates(&self, doc: &ExportDocument) -> Vec<Candidate> {
        let ExportDocument::Html(html) = doc else {
            return Vec::new();
        };
        html.select(&LINK_SELECTOR)
            .filter_map(|a| {
                let href = a.value().attr("href")?;
                if !self.is_profile_href(href) {
                    return None;
                }
                Some(Candidate {
                    link: Some(href.to_string()),
                    label: first_text(a),
                    timestamp: time_attribute(a),
                })
            })
            .collect()
    }
}

fn candidate_from_container(el: ElementRef<'_>) -> Candidate {
    let link = el.select(&LINK_SELECTOR).next();
    let label = link.and_then(first_text).or_else(|| first_text(el));
    Candidate {
        link: link
            .and_then(|a| a.value().attr("href"))
            .map(String::from),
        label,
        timestamp: time_attribute(el),
    }
}

fn first_text(el: ElementRef<'_>) -> Option<String> {
    el.text()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(String::from)
}

/// Time-like attribute on the element itself or any descendant.
fn time_attribute(el: ElementRef<'_>) -> Option<String> {
    std::iter::once(el)
        .chain(el.select(&TIME_SELECTOR))
        .find_map(|e| {
            TIME_ATTRIBUTES
                .iter()
                .find_map(|attr| e.value().attr(attr))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(normalize_timestamp)
}

// =============================================================================
// Text fallback
// =============================================================================

/// Last resort: username-shaped tokens in the document text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextScanStrategy;

impl TextScanStrategy {
    fn accept(token: &str) -> Option<&str> {
        let token = token.trim_start_matches('@').trim_matches('.');
        if token.chars().count() < 3 || token.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let lower = token.to_lowercase();
        if STOP_WORDS.contains(&lower.as_str())
            || NON_USERNAME_SUFFIXES.iter().any(|s| lower.ends_with(s))
        {
            return None;
        }
        Some(token)
    }
}

impl ExtractionStrategy for TextScanStrategy {
    fn name(&self) -> &'static str {
        "text-scan"
    }

    fn candidates(&self, doc: &ExportDocument) -> Vec<Candidate> {
        let text = doc.text_content();
        let mut seen = HashSet::new();
        USERNAME_TOKEN
            .find_iter(&text)
            .filter_map(|m| Self::accept(m.as_str()))
            .filter(|token| seen.insert(username_key(token)))
            .map(|token| Candidate {
                link: None,
                label: Some(token.to_string()),
                timestamp: None,
            })
            .collect()
    }
}

// =============================================================================
// Timestamps
// =============================================================================

/// JSON timestamps are epoch seconds (or milliseconds) or strings.
fn json_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_i64().and_then(epoch_to_rfc3339),
        Value::String(s) if !s.trim().is_empty() => Some(normalize_timestamp(s.trim())),
        _ => None,
    }
}

/// Epoch numbers become RFC 3339; anything else is kept as written.
fn normalize_timestamp(raw: &str) -> String {
    raw.parse::<i64>()
        .ok()
        .and_then(epoch_to_rfc3339)
        .unwrap_or_else(|| raw.to_string())
}

fn epoch_to_rfc3339(epoch: i64) -> Option<String> {
    // Values past the year 5138 in seconds are taken as milliseconds.
    let dt = if epoch.unsigned_abs() >= 100_000_000_000 {
        DateTime::<Utc>::from_timestamp_millis(epoch)?
    } else {
        DateTime::<Utc>::from_timestamp(epoch, 0)?
    };
    Some(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

// =============================================================================
// Extractor
// =============================================================================

/// Extraction settings.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Base for synthesized profile URLs.
    pub profile_base_url: String,
    /// Hosts whose anchors count as profile links.
    pub profile_hosts: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            profile_base_url: DEFAULT_PROFILE_BASE_URL.to_string(),
            profile_hosts: DEFAULT_PROFILE_HOSTS.iter().map(|h| (*h).to_string()).collect(),
        }
    }
}

/// How an extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// A structural strategy matched.
    Matched(&'static str),
    /// Only the text scan found anything.
    Fallback,
    /// Nothing usable in the document.
    Empty,
    /// Input was not text.
    InvalidInput,
}

/// Accounts from one document plus how they were found.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub kind: ListKind,
    pub accounts: Vec<Account>,
    pub outcome: ExtractionOutcome,
    /// Candidates dropped because no usable username survived sanitization.
    pub rejected: usize,
}

impl Extraction {
    const fn empty(kind: ListKind, outcome: ExtractionOutcome) -> Self {
        Self {
            kind,
            accounts: Vec::new(),
            outcome,
            rejected: 0,
        }
    }
}

/// Ordered strategy chain with a text fallback.
pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    fallback: TextScanStrategy,
    config: ExtractConfig,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(ExtractConfig::default())
    }
}

impl Extractor {
    /// Extractor with the standard strategy chain.
    #[must_use]
    pub fn new(config: ExtractConfig) -> Self {
        let strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(JsonStringListStrategy),
            Box::new(JsonUserLinkStrategy),
            Box::new(TableRowStrategy),
            Box::new(ExportClassStrategy),
            Box::new(ProfileAnchorStrategy::new(config.profile_hosts.iter().cloned())),
        ];
        Self::with_strategies(config, strategies)
    }

    /// Extractor with a custom chain. The text fallback always runs last.
    #[must_use]
    pub fn with_strategies(
        config: ExtractConfig,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
    ) -> Self {
        Self {
            strategies,
            fallback: TextScanStrategy,
            config,
        }
    }

    /// Names of the structural strategies, in the order they are tried.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Accounts found in `text`.
    #[must_use]
    pub fn extract(&self, text: &str, kind: ListKind) -> Vec<Account> {
        self.extract_detailed(text, kind).accounts
    }

    /// Accounts found in `text`, with the strategy that produced them.
    #[must_use]
    pub fn extract_detailed(&self, text: &str, kind: ListKind) -> Extraction {
        let doc = ExportDocument::parse(text);
        let now = now_timestamp();
        let mut rejected = 0;

        for strategy in &self.strategies {
            let candidates = strategy.candidates(&doc);
            let (accounts, dropped) = self.build_accounts(&candidates, &now);
            rejected += dropped;
            if !accounts.is_empty() {
                let outcome = ExtractionOutcome::Matched(strategy.name());
                return self.finish(kind, &doc, accounts, outcome, rejected);
            }
        }

        let candidates = self.fallback.candidates(&doc);
        let (accounts, dropped) = self.build_accounts(&candidates, &now);
        rejected += dropped;
        self.finish(kind, &doc, accounts, ExtractionOutcome::Fallback, rejected)
    }

    /// Same as [`extract_detailed`](Self::extract_detailed), yielding between chunks.
    pub async fn extract_cooperative(
        &self,
        text: &str,
        kind: ListKind,
        scheduler: &mut ChunkScheduler,
    ) -> Extraction {
        let doc = ExportDocument::parse(text);
        let now = now_timestamp();
        let mut rejected = 0;

        for strategy in &self.strategies {
            let candidates = strategy.candidates(&doc);
            scheduler.tick().await;
            let mut accounts = Vec::with_capacity(candidates.len());
            for chunk in candidates.chunks(scheduler.chunk_size()) {
                let (built, dropped) = self.build_accounts(chunk, &now);
                accounts.extend(built);
                rejected += dropped;
                scheduler.advance(chunk.len()).await;
            }
            if !accounts.is_empty() {
                let outcome = ExtractionOutcome::Matched(strategy.name());
                return self.finish(kind, &doc, accounts, outcome, rejected);
            }
        }

        let candidates = self.fallback.candidates(&doc);
        let (accounts, dropped) = self.build_accounts(&candidates, &now);
        scheduler.advance(candidates.len()).await;
        self.finish(kind, &doc, accounts, ExtractionOutcome::Fallback, rejected + dropped)
    }

    /// Extract from raw bytes; non-UTF-8 input yields [`ExtractionOutcome::InvalidInput`].
    #[must_use]
    pub fn extract_bytes(&self, bytes: &[u8], kind: ListKind) -> Extraction {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.extract_detailed(text, kind),
            Err(e) => {
                warn!(%kind, error = %e, "Export document is not text");
                Extraction::empty(kind, ExtractionOutcome::InvalidInput)
            }
        }
    }

    fn finish(
        &self,
        kind: ListKind,
        doc: &ExportDocument,
        accounts: Vec<Account>,
        outcome: ExtractionOutcome,
        rejected: usize,
    ) -> Extraction {
        let outcome = if accounts.is_empty() {
            warn!(%kind, document = doc.kind(), "No accounts found by any strategy");
            ExtractionOutcome::Empty
        } else {
            info!(
                %kind,
                document = doc.kind(),
                ?outcome,
                accounts = accounts.len(),
                rejected,
                "Extracted accounts"
            );
            outcome
        };
        Extraction {
            kind,
            accounts,
            outcome,
            rejected,
        }
    }

    fn build_accounts(&self, candidates: &[Candidate], now: &str) -> (Vec<Account>, usize) {
        let mut accounts = Vec::with_capacity(candidates.len());
        let mut rejected = 0;
        for candidate in candidates {
            match self.build_account(candidate, now) {
                Some(account) => accounts.push(account),
                None => rejected += 1,
            }
        }
        (accounts, rejected)
    }

    fn build_account(&self, candidate: &Candidate, now: &str) -> Option<Account> {
        let from_link = candidate.link.as_deref().and_then(username_from_link);
        let link_is_profile = from_link.is_some();
        let username = from_link.or_else(|| candidate.label.as_deref().and_then(sanitize_username))?;

        let profile = match candidate.link.as_deref() {
            Some(link) if link_is_profile && is_absolute_http(link) => link.to_string(),
            _ => profile_url(&self.config.profile_base_url, &username),
        };
        let timestamp = candidate
            .timestamp
            .clone()
            .unwrap_or_else(|| now.to_string());

        Some(Account::new(username, profile, timestamp))
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
