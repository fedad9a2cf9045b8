//! Relationship analysis: who you follow that doesn't follow you back.

use crate::chunked::{ChunkScheduler, sort_cooperative};
use crate::model::{Account, AnalysisResult, Stats, compare_usernames};
use std::collections::HashSet;
use tracing::debug;

/// First-seen-wins deduplication by lowercase username.
#[derive(Debug, Default)]
struct Deduper {
    seen: HashSet<String>,
    kept: Vec<Account>,
}

impl Deduper {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            kept: Vec::with_capacity(capacity),
        }
    }

    fn push_all(&mut self, accounts: impl IntoIterator<Item = Account>) {
        for account in accounts {
            if self.seen.insert(account.key()) {
                self.kept.push(account);
            }
        }
    }

    fn finish(self) -> (Vec<Account>, HashSet<String>) {
        (self.kept, self.seen)
    }
}

/// Drop later accounts whose username matches an earlier one, ignoring case.
#[must_use]
pub fn dedup_accounts(accounts: Vec<Account>) -> Vec<Account> {
    let mut deduper = Deduper::with_capacity(accounts.len());
    deduper.push_all(accounts);
    deduper.finish().0
}

/// Sort by username ascending, case-insensitively.
pub fn sort_by_username(accounts: &mut [Account]) {
    accounts.sort_by(|a, b| compare_usernames(&a.username, &b.username));
}

/// Compute the not-following-back set and stats.
#[must_use]
pub fn analyze(followers: Vec<Account>, following: Vec<Account>) -> AnalysisResult {
    let mut followers_dedup = Deduper::with_capacity(followers.len());
    followers_dedup.push_all(followers);
    let (followers, follower_keys) = followers_dedup.finish();
    let following = dedup_accounts(following);

    let not_following_back = following
        .iter()
        .filter(|a| !follower_keys.contains(&a.key()))
        .cloned()
        .collect();

    assemble(followers, following, not_following_back)
}

/// [`analyze`] with a yield point after every chunk of accounts.
pub async fn analyze_cooperative(
    followers: Vec<Account>,
    following: Vec<Account>,
    scheduler: &mut ChunkScheduler,
) -> AnalysisResult {
    let chunk_size = scheduler.chunk_size();

    let mut followers_dedup = Deduper::with_capacity(followers.len());
    let mut followers = followers.into_iter().peekable();
    while followers.peek().is_some() {
        followers_dedup.push_all(followers.by_ref().take(chunk_size));
        scheduler.advance(chunk_size).await;
    }
    let (followers, follower_keys) = followers_dedup.finish();

    let mut following_dedup = Deduper::with_capacity(following.len());
    let mut following = following.into_iter().peekable();
    while following.peek().is_some() {
        following_dedup.push_all(following.by_ref().take(chunk_size));
        scheduler.advance(chunk_size).await;
    }
    let (following, _) = following_dedup.finish();

    let mut not_following_back = Vec::new();
    for chunk in following.chunks(chunk_size) {
        not_following_back.extend(
            chunk
                .iter()
                .filter(|a| !follower_keys.contains(&a.key()))
                .cloned(),
        );
        scheduler.advance(chunk.len()).await;
    }

    let by_username = |a: &Account, b: &Account| compare_usernames(&a.username, &b.username);
    let followers = sort_cooperative(followers, scheduler, by_username).await;
    let following = sort_cooperative(following, scheduler, by_username).await;
    let not_following_back = sort_cooperative(not_following_back, scheduler, by_username).await;

    summarize(followers, following, not_following_back)
}

fn assemble(
    mut followers: Vec<Account>,
    mut following: Vec<Account>,
    mut not_following_back: Vec<Account>,
) -> AnalysisResult {
    sort_by_username(&mut followers);
    sort_by_username(&mut following);
    sort_by_username(&mut not_following_back);
    summarize(followers, following, not_following_back)
}

fn summarize(
    followers: Vec<Account>,
    following: Vec<Account>,
    not_following_back: Vec<Account>,
) -> AnalysisResult {
    let stats = Stats::from_counts(followers.len(), following.len(), not_following_back.len());
    debug!(
        followers = stats.followers_count,
        following = stats.following_count,
        not_following_back = stats.not_following_back_count,
        mutual = stats.mutual_count,
        "Analysis complete"
    );

    AnalysisResult {
        followers,
        following,
        not_following_back,
        stats,
    }
}
