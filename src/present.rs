//! Display ordering of the not-following-back list.
//!
//! Accounts not on the whitelist always come first. Inside each partition
//! the chosen [`SortKey`] applies, with username as the final tiebreaker.

use crate::chunked::{ChunkScheduler, sort_cooperative};
use crate::model::{Account, SortKey, compare_usernames};
use chrono::{DateTime, NaiveDateTime, Utc};
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Filter by `search` and order for display.
///
/// `whitelist` holds lowercase usernames. `search` is a case-insensitive
/// substring match on the username; an empty or blank search keeps
/// everything.
#[must_use]
pub fn present(
    accounts: &[Account],
    whitelist: &HashSet<String>,
    sort: SortKey,
    search: &str,
) -> Vec<Account> {
    let needle = search.trim().to_lowercase();
    accounts
        .iter()
        .filter_map(|a| rank(a, whitelist, &needle))
        .sorted_by(|a, b| compare_ranked(sort, a, b))
        .map(|(_, _, a)| a.clone())
        .collect()
}

/// [`present`] with a yield point after every chunk of accounts.
pub async fn present_cooperative(
    accounts: &[Account],
    whitelist: &HashSet<String>,
    sort: SortKey,
    search: &str,
    scheduler: &mut ChunkScheduler,
) -> Vec<Account> {
    let needle = search.trim().to_lowercase();
    let mut ranked = Vec::with_capacity(accounts.len());
    for chunk in accounts.chunks(scheduler.chunk_size()) {
        ranked.extend(chunk.iter().filter_map(|a| rank(a, whitelist, &needle)));
        scheduler.advance(chunk.len()).await;
    }

    sort_cooperative(ranked, scheduler, |a, b| compare_ranked(sort, a, b))
        .await
        .into_iter()
        .map(|(_, _, a)| a.clone())
        .collect()
}

type Ranked<'a> = (bool, Option<i64>, &'a Account);

fn rank<'a>(
    account: &'a Account,
    whitelist: &HashSet<String>,
    needle: &str,
) -> Option<Ranked<'a>> {
    let key = account.key();
    if !needle.is_empty() && !key.contains(needle) {
        return None;
    }
    Some((
        whitelist.contains(&key),
        parse_timestamp(&account.timestamp),
        account,
    ))
}

fn compare_ranked(sort: SortKey, a: &Ranked<'_>, b: &Ranked<'_>) -> Ordering {
    let (wl_a, ts_a, a) = a;
    let (wl_b, ts_b, b) = b;
    wl_a.cmp(wl_b)
        .then_with(|| compare_within(sort, *ts_a, *ts_b))
        .then_with(|| compare_usernames(&a.username, &b.username))
}

/// Slice a presented list for display.
#[must_use]
pub fn paginate(accounts: &[Account], offset: usize, limit: Option<usize>) -> &[Account] {
    let start = offset.min(accounts.len());
    let end = limit.map_or(accounts.len(), |n| start.saturating_add(n).min(accounts.len()));
    &accounts[start..end]
}

fn compare_within(sort: SortKey, a: Option<i64>, b: Option<i64>) -> Ordering {
    // Unparseable timestamps count as the oldest possible.
    let a = a.unwrap_or(i64::MIN);
    let b = b.unwrap_or(i64::MIN);
    match sort {
        SortKey::Username => Ordering::Equal,
        SortKey::Newest => b.cmp(&a),
        SortKey::Oldest => a.cmp(&b),
    }
}

/// Epoch milliseconds for an account timestamp, if it parses.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) and epoch
/// seconds or milliseconds.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc().timestamp_millis());
    }
    let epoch: i64 = trimmed.parse().ok()?;
    if epoch.unsigned_abs() >= 100_000_000_000 {
        Some(epoch)
    } else {
        epoch.checked_mul(1000)
    }
}
