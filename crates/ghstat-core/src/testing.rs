//! In-memory stand-in for the GraphQL API, for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::QueryResult;
use crate::transport::{Transport, TransportResponse};

/// Serves repositories, branches and commits from memory, honoring `first`
/// and `after` like the real connection API. Cursors are plain offsets.
#[derive(Debug, Default)]
pub(crate) struct FakeGitHub {
    login: String,
    repositories: Vec<Value>,
    branches: HashMap<String, Vec<String>>,
    commits: HashMap<(String, String), Vec<Value>>,
    failing: HashSet<(String, String)>,
    always_rate_limited: bool,
    rate_limited_remaining: AtomicUsize,
}

impl FakeGitHub {
    pub(crate) fn new(login: &str) -> Self {
        Self {
            login: login.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn repository(mut self, name: &str, language: Option<&str>) -> Self {
        self.repositories.push(json!({
            "primaryLanguage": language.map(|l| json!({"name": l})),
            "name": name,
            "owner": {"login": self.login},
            "isPrivate": false,
        }));
        self
    }

    pub(crate) fn branch(mut self, repo: &str, branch: &str) -> Self {
        self.branches
            .entry(repo.to_string())
            .or_default()
            .push(branch.to_string());
        self
    }

    /// A commit authored by the fake's own login.
    pub(crate) fn commit(self, repo: &str, branch: &str, oid: &str, date: &str, additions: u64, deletions: u64) -> Self {
        let login = self.login.clone();
        self.authored_commit(repo, branch, oid, date, additions, deletions, Some(&login))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn authored_commit(
        mut self,
        repo: &str,
        branch: &str,
        oid: &str,
        date: &str,
        additions: u64,
        deletions: u64,
        author: Option<&str>,
    ) -> Self {
        self.commits
            .entry((repo.to_string(), branch.to_string()))
            .or_default()
            .push(json!({
                "committedDate": date,
                "oid": oid,
                "additions": additions,
                "deletions": deletions,
                "author": {"user": author.map(|login| json!({"login": login}))},
            }));
        self
    }

    pub(crate) fn fail_branch(mut self, repo: &str, branch: &str) -> Self {
        self.failing.insert((repo.to_string(), branch.to_string()));
        self
    }

    pub(crate) fn always_rate_limited(mut self) -> Self {
        self.always_rate_limited = true;
        self
    }

    pub(crate) fn rate_limit_first(self, count: usize) -> Self {
        self.rate_limited_remaining.store(count, Ordering::SeqCst);
        self
    }

    fn take_rate_limit(&self) -> bool {
        self.always_rate_limited
            || self
                .rate_limited_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

fn connection(nodes: &[Value], offset: usize, first: usize) -> Value {
    let start = offset.min(nodes.len());
    let end = (start + first).min(nodes.len());
    json!({
        "nodes": &nodes[start..end],
        "pageInfo": {"hasNextPage": end < nodes.len(), "endCursor": end.to_string()},
    })
}

#[async_trait]
impl Transport for FakeGitHub {
    async fn post(&self, body: &Value) -> QueryResult<TransportResponse> {
        if self.take_rate_limit() {
            return Ok(TransportResponse::with_status(
                429,
                json!({"message": "You have exceeded a secondary rate limit."}),
            ));
        }

        let vars = &body["variables"];
        let first = vars["first"].as_u64().map_or(100, |n| n as usize);
        let offset = vars["after"]
            .as_str()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let repo = vars["name"].as_str().unwrap_or_default().to_string();

        let data = if let Some(branch) = vars["branch"].as_str() {
            let key = (repo, branch.to_string());
            if self.failing.contains(&key) {
                return Ok(TransportResponse::with_status(502, json!({"message": "Bad Gateway"})));
            }
            let nodes = self.commits.get(&key).cloned().unwrap_or_default();
            json!({"repository": {"ref": {"target": {"history": connection(&nodes, offset, first)}}}})
        } else if vars.get("owner").is_some() {
            let nodes: Vec<Value> = self
                .branches
                .get(&repo)
                .into_iter()
                .flatten()
                .map(|name| json!({"name": name}))
                .collect();
            json!({"repository": {"refs": connection(&nodes, offset, first)}})
        } else {
            json!({"user": {"repositories": connection(&self.repositories, offset, first)}})
        };
        Ok(TransportResponse::ok(json!({ "data": data })))
    }
}
