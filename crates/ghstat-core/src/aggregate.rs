//! Commit aggregation.
//!
//! Walks every branch of every repository, keeps the target author's
//! commits, counts each commit id once per repository, and sums line changes
//! into a year → quarter → language [`BucketMap`]. The commits that were
//! counted are recorded in a [`DedupLedger`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::QueryClient;
use crate::error::{QueryError, QueryResult};
use crate::model::{CommitRecord, RepositoryRef};
use crate::query::Query;
use crate::transport::Transport;

/// Cumulative line changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCounts {
    /// Lines added.
    pub additions: u64,
    /// Lines deleted.
    pub deletions: u64,
}

impl LineCounts {
    /// Add another count into this one.
    pub const fn add(&mut self, other: Self) {
        self.additions = self.additions.saturating_add(other.additions);
        self.deletions = self.deletions.saturating_add(other.deletions);
    }
}

/// Line changes keyed by year, quarter (1–4) and language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketMap(BTreeMap<i32, BTreeMap<u8, BTreeMap<String, LineCounts>>>);

impl BucketMap {
    /// Accumulate into a cell, creating it at zero if absent.
    pub fn add(&mut self, year: i32, quarter: u8, language: &str, counts: LineCounts) {
        self.0
            .entry(year)
            .or_default()
            .entry(quarter)
            .or_default()
            .entry(language.to_string())
            .or_default()
            .add(counts);
    }

    /// One cell, if anything was recorded there.
    pub fn get(&self, year: i32, quarter: u8, language: &str) -> Option<LineCounts> {
        self.0.get(&year)?.get(&quarter)?.get(language).copied()
    }

    /// Every cell in (year, quarter, language) order.
    pub fn cells(&self) -> impl Iterator<Item = (i32, u8, &str, LineCounts)> + '_ {
        self.0.iter().flat_map(|(&year, quarters)| {
            quarters.iter().flat_map(move |(&quarter, languages)| {
                languages
                    .iter()
                    .map(move |(language, &counts)| (year, quarter, language.as_str(), counts))
            })
        })
    }

    /// The underlying nested map.
    pub const fn as_map(&self) -> &BTreeMap<i32, BTreeMap<u8, BTreeMap<String, LineCounts>>> {
        &self.0
    }

    /// Whether no cell has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Repository → branch → commit id → committed date, for commits already
/// counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupLedger(BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>);

impl DedupLedger {
    /// Whether `commit_id` was counted under any branch of `repository`.
    pub fn contains(&self, repository: &str, commit_id: &str) -> bool {
        self.0
            .get(repository)
            .is_some_and(|branches| branches.values().any(|ids| ids.contains_key(commit_id)))
    }

    /// Record a counted commit.
    pub fn record(&mut self, repository: &str, branch: &str, commit_id: &str, committed_date: &str) {
        self.0
            .entry(repository.to_string())
            .or_default()
            .entry(branch.to_string())
            .or_default()
            .insert(commit_id.to_string(), committed_date.to_string());
    }

    /// Branches (and their counted commits) recorded for `repository`.
    pub fn branches(&self, repository: &str) -> Option<&BTreeMap<String, BTreeMap<String, String>>> {
        self.0.get(repository)
    }

    /// Repositories with at least one counted commit.
    pub fn repositories(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total counted commits.
    pub fn commit_count(&self) -> usize {
        self.0
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }
}

/// Everything one aggregation run produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionStats {
    /// Line changes by year, quarter and language.
    pub yearly: BucketMap,
    /// Commits counted, by repository and branch.
    pub ledger: DedupLedger,
}

impl ContributionStats {
    /// Sum over all years and quarters, per language.
    pub fn totals_by_language(&self) -> BTreeMap<String, LineCounts> {
        let mut totals: BTreeMap<String, LineCounts> = BTreeMap::new();
        for (_, _, language, counts) in self.yearly.cells() {
            totals.entry(language.to_string()).or_default().add(counts);
        }
        totals
    }

    /// Sum over all quarters and languages, per year.
    pub fn yearly_totals(&self) -> BTreeMap<i32, LineCounts> {
        let mut totals: BTreeMap<i32, LineCounts> = BTreeMap::new();
        for (year, _, _, counts) in self.yearly.cells() {
            totals.entry(year).or_default().add(counts);
        }
        totals
    }

    /// Count one commit seen on `branch` of `repository`.
    ///
    /// Returns `false` when the id was already counted for this repository
    /// or its date cannot be read.
    fn record_commit(&mut self, repository: &RepositoryRef, branch: &str, commit: &CommitRecord) -> bool {
        if self.ledger.contains(&repository.name, &commit.id) {
            return false;
        }
        let Some((year, quarter)) = commit_period(&commit.committed_date) else {
            warn!(
                commit = %commit.id,
                date = %commit.committed_date,
                "skipping commit with unreadable date"
            );
            return false;
        };
        self.ledger
            .record(&repository.name, branch, &commit.id, &commit.committed_date);
        if let Some(language) = &repository.primary_language {
            self.yearly.add(
                year,
                quarter,
                language,
                LineCounts {
                    additions: commit.additions,
                    deletions: commit.deletions,
                },
            );
        }
        true
    }
}

/// Aggregation stopped early on a client error that affects every later
/// request.
#[derive(Error, Debug)]
pub enum AggregateError {
    /// Retries were exhausted or a request was malformed.
    #[error("aggregation aborted: {source}")]
    Aborted {
        /// The client error that stopped the run.
        #[source]
        source: QueryError,
        /// Everything accumulated before the failure.
        partial: Box<ContributionStats>,
    },
}

impl AggregateError {
    /// Progress made before the abort.
    pub fn partial(&self) -> &ContributionStats {
        match self {
            Self::Aborted { partial, .. } => partial,
        }
    }
}

/// Calendar quarter (1–4) of a month (1–12).
pub const fn quarter_of(month: u32) -> u8 {
    (month.saturating_sub(1) / 3 + 1) as u8
}

/// Year and quarter of an ISO-8601 timestamp, read from its date part.
pub fn commit_period(committed_date: &str) -> Option<(i32, u8)> {
    let day = committed_date.get(..10)?;
    let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
    Some((date.year(), quarter_of(date.month())))
}

/// Aggregate `author`'s commits across `repositories`.
///
/// Repositories and branches are walked in the order given, so the first
/// branch to show a commit is the one it is recorded under. Branch and
/// repository failures are logged and skipped. Exhausted retries and
/// validation failures abort the run with the partial result attached.
#[instrument(skip_all, fields(author = %author, repositories = repositories.len()))]
pub async fn aggregate<T: Transport>(
    client: &mut QueryClient<T>,
    repositories: &[RepositoryRef],
    author: &str,
    pacing: Duration,
) -> Result<ContributionStats, AggregateError> {
    let mut stats = ContributionStats::default();
    for repository in repositories {
        if let Err(source) = aggregate_repository(client, repository, author, pacing, &mut stats).await {
            warn!(error = %source, "aborting aggregation");
            return Err(AggregateError::Aborted {
                source,
                partial: Box::new(stats),
            });
        }
    }
    info!(
        commits = stats.ledger.commit_count(),
        requests = client.requests_sent(),
        "aggregation complete"
    );
    Ok(stats)
}

#[instrument(skip_all, fields(repository = %repository.full_name()))]
async fn aggregate_repository<T: Transport>(
    client: &mut QueryClient<T>,
    repository: &RepositoryRef,
    author: &str,
    pacing: Duration,
    stats: &mut ContributionStats,
) -> QueryResult<()> {
    let branch_query = Query::BranchList {
        owner: repository.owner.clone(),
        repository: repository.name.clone(),
    };
    let branches = match client.fetch_query(&branch_query).await {
        Ok(set) => set.branches(),
        Err(e) if e.aborts_run() => return Err(e),
        Err(e) => {
            warn!(error = %e, "skipping repository");
            return Ok(());
        }
    };
    if branches.is_empty() {
        debug!("no branches");
        return Ok(());
    }

    for branch in branches {
        let history = Query::CommitHistory {
            owner: repository.owner.clone(),
            repository: repository.name.clone(),
            branch: branch.name.clone(),
        };
        let commits = match client.fetch_query(&history).await {
            Ok(set) => set.commits(),
            Err(e) if e.aborts_run() => return Err(e),
            Err(e) => {
                warn!(branch = %branch.name, error = %e, "skipping branch");
                continue;
            }
        };

        let counted = commits
            .iter()
            .filter(|c| c.author_login.as_deref() == Some(author))
            .filter(|c| stats.record_commit(repository, &branch.name, c))
            .count();
        debug!(branch = %branch.name, seen = commits.len(), counted, "branch processed");

        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::testing::FakeGitHub;

    fn repo(name: &str, language: Option<&str>) -> RepositoryRef {
        RepositoryRef {
            owner: "octocat".into(),
            name: name.into(),
            primary_language: language.map(str::to_string),
            is_private: false,
        }
    }

    async fn run(fake: FakeGitHub, repos: &[RepositoryRef]) -> Result<ContributionStats, AggregateError> {
        let mut client = QueryClient::new(fake, ClientOptions::default().without_backoff());
        aggregate(&mut client, repos, "octocat", Duration::ZERO).await
    }

    #[test]
    fn quarters_follow_calendar() {
        assert_eq!(quarter_of(1), 1);
        assert_eq!(quarter_of(3), 1);
        assert_eq!(quarter_of(4), 2);
        assert_eq!(quarter_of(9), 3);
        assert_eq!(quarter_of(12), 4);
    }

    #[test]
    fn period_reads_date_prefix() {
        assert_eq!(commit_period("2023-11-30T23:59:59Z"), Some((2023, 4)));
        assert_eq!(commit_period("2024-04-01T00:00:00+09:00"), Some((2024, 2)));
        assert_eq!(commit_period("yesterday"), None);
        assert_eq!(commit_period(""), None);
    }

    #[tokio::test]
    async fn commit_on_two_branches_counts_once() {
        let fake = FakeGitHub::new("octocat")
            .repository("hello", Some("Rust"))
            .branch("hello", "main")
            .branch("hello", "feature")
            .commit("hello", "main", "c1", "2024-02-10T12:00:00Z", 10, 2)
            .commit("hello", "feature", "c1", "2024-02-10T12:00:00Z", 10, 2)
            .commit("hello", "feature", "c2", "2024-05-01T08:00:00Z", 5, 0);

        let stats = run(fake, &[repo("hello", Some("Rust"))]).await.unwrap();

        assert_eq!(
            stats.yearly.get(2024, 1, "Rust"),
            Some(LineCounts { additions: 10, deletions: 2 })
        );
        assert_eq!(
            stats.yearly.get(2024, 2, "Rust"),
            Some(LineCounts { additions: 5, deletions: 0 })
        );
        let branches = stats.ledger.branches("hello").unwrap();
        assert!(branches["main"].contains_key("c1"));
        assert!(!branches["feature"].contains_key("c1"));
        assert_eq!(stats.ledger.commit_count(), 2);
    }

    #[tokio::test]
    async fn same_id_in_two_repositories_counts_twice() {
        let fake = FakeGitHub::new("octocat")
            .repository("a", Some("Go"))
            .repository("b", Some("Go"))
            .branch("a", "main")
            .branch("b", "main")
            .commit("a", "main", "shared", "2022-07-01T00:00:00Z", 1, 1)
            .commit("b", "main", "shared", "2022-07-01T00:00:00Z", 1, 1);

        let stats = run(fake, &[repo("a", Some("Go")), repo("b", Some("Go"))]).await.unwrap();
        assert_eq!(
            stats.yearly.get(2022, 3, "Go"),
            Some(LineCounts { additions: 2, deletions: 2 })
        );
    }

    #[tokio::test]
    async fn other_authors_and_unlinked_commits_are_ignored() {
        let fake = FakeGitHub::new("octocat")
            .repository("hello", Some("Rust"))
            .branch("hello", "main")
            .commit("hello", "main", "mine", "2024-01-01T00:00:00Z", 3, 0)
            .authored_commit("hello", "main", "theirs", "2024-01-01T00:00:00Z", 100, 0, Some("hubot"))
            .authored_commit("hello", "main", "nobody", "2024-01-01T00:00:00Z", 100, 0, None);

        let stats = run(fake, &[repo("hello", Some("Rust"))]).await.unwrap();
        assert_eq!(
            stats.yearly.get(2024, 1, "Rust"),
            Some(LineCounts { additions: 3, deletions: 0 })
        );
        assert_eq!(stats.ledger.commit_count(), 1);
    }

    #[tokio::test]
    async fn repository_without_language_is_ledgered_not_bucketed() {
        let fake = FakeGitHub::new("octocat")
            .repository("notes", None)
            .branch("notes", "main")
            .commit("notes", "main", "n1", "2021-10-10T00:00:00Z", 7, 7);

        let stats = run(fake, &[repo("notes", None)]).await.unwrap();
        assert!(stats.yearly.is_empty());
        assert!(stats.ledger.contains("notes", "n1"));
    }

    #[tokio::test]
    async fn repository_without_branches_is_skipped() {
        let fake = FakeGitHub::new("octocat")
            .repository("empty", Some("C"))
            .repository("hello", Some("C"))
            .branch("hello", "main")
            .commit("hello", "main", "h1", "2020-03-03T00:00:00Z", 4, 1);

        let stats = run(fake, &[repo("empty", Some("C")), repo("hello", Some("C"))])
            .await
            .unwrap();
        assert_eq!(stats.ledger.repositories().collect::<Vec<_>>(), vec!["hello"]);
        assert_eq!(stats.yearly.get(2020, 1, "C").map(|c| c.additions), Some(4));
    }

    #[tokio::test]
    async fn failing_branch_keeps_other_branches() {
        let fake = FakeGitHub::new("octocat")
            .repository("hello", Some("Rust"))
            .branch("hello", "broken")
            .branch("hello", "main")
            .fail_branch("hello", "broken")
            .commit("hello", "broken", "lost", "2024-01-01T00:00:00Z", 50, 0)
            .commit("hello", "main", "kept", "2024-01-01T00:00:00Z", 8, 1);

        let stats = run(fake, &[repo("hello", Some("Rust"))]).await.unwrap();
        assert_eq!(
            stats.yearly.get(2024, 1, "Rust"),
            Some(LineCounts { additions: 8, deletions: 1 })
        );
        assert!(!stats.ledger.contains("hello", "lost"));
    }

    #[tokio::test]
    async fn exhausted_retries_abort_with_partial_progress() {
        let fake = FakeGitHub::new("octocat")
            .repository("first", Some("Rust"))
            .branch("first", "main")
            .commit("first", "main", "f1", "2024-01-01T00:00:00Z", 1, 0)
            .always_rate_limited();
        let mut client = QueryClient::new(
            fake,
            ClientOptions {
                max_retries: 1,
                ..ClientOptions::default()
            }
            .without_backoff(),
        );

        let err = aggregate(&mut client, &[repo("first", Some("Rust"))], "octocat", Duration::ZERO)
            .await
            .unwrap_err();
        let AggregateError::Aborted { source, partial } = err;
        assert!(matches!(source, QueryError::ExhaustedRetries { attempts: 2, .. }));
        assert!(partial.yearly.is_empty());
        assert_eq!(client.requests_sent(), 2);
    }

    #[test]
    fn summaries_roll_up_cells() {
        let mut stats = ContributionStats::default();
        let counts = |a, d| LineCounts { additions: a, deletions: d };
        stats.yearly.add(2023, 1, "Rust", counts(1, 1));
        stats.yearly.add(2023, 4, "Go", counts(2, 0));
        stats.yearly.add(2024, 2, "Rust", counts(10, 5));

        let by_language = stats.totals_by_language();
        assert_eq!(by_language["Rust"], counts(11, 6));
        assert_eq!(by_language["Go"], counts(2, 0));

        let by_year = stats.yearly_totals();
        assert_eq!(by_year[&2023], counts(3, 1));
        assert_eq!(by_year[&2024], counts(10, 5));
    }

    #[test]
    fn stats_serialize_with_nested_keys() {
        let mut stats = ContributionStats::default();
        stats.yearly.add(2024, 3, "Rust", LineCounts { additions: 1, deletions: 2 });
        stats.ledger.record("hello", "main", "abc", "2024-08-01T00:00:00Z");

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["yearly"]["2024"]["3"]["Rust"]["additions"], 1);
        assert_eq!(json["ledger"]["hello"]["main"]["abc"], "2024-08-01T00:00:00Z");

        let back: ContributionStats = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
    }
}
