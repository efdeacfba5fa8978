//! Records decoded from query results.
//!
//! The remote returns nested GraphQL shapes; these types flatten them into
//! what the aggregator needs. Decoding goes through private wire structs so
//! the public types keep a stable serialized form for the persisted cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};

/// A repository owned by the target user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Owner login.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Primary language as reported by the remote, if any.
    pub primary_language: Option<String>,
    /// Whether the repository is private.
    pub is_private: bool,
}

impl RepositoryRef {
    /// `owner/name`, for log lines.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Decode a `repository-list` node.
    pub fn from_node(node: &Value) -> QueryResult<Self> {
        let wire: RepositoryNode = decode(node, "repository")?;
        Ok(Self {
            owner: wire.owner.login,
            name: wire.name,
            primary_language: wire.primary_language.map(|l| l.name),
            is_private: wire.is_private,
        })
    }
}

/// A branch of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    /// Short branch name (no `refs/heads/` prefix).
    pub name: String,
}

impl BranchRef {
    /// Decode a `branch-list` node.
    pub fn from_node(node: &Value) -> QueryResult<Self> {
        let wire: BranchNode = decode(node, "branch")?;
        Ok(Self { name: wire.name })
    }
}

/// One commit from a branch history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit object id.
    pub id: String,
    /// ISO-8601 commit timestamp, verbatim from the remote.
    pub committed_date: String,
    /// Lines added.
    pub additions: u64,
    /// Lines deleted.
    pub deletions: u64,
    /// Login of the linked user account; `None` when the author email is not
    /// tied to any account.
    pub author_login: Option<String>,
}

impl CommitRecord {
    /// Decode a `commit-history` node.
    pub fn from_node(node: &Value) -> QueryResult<Self> {
        let wire: CommitNode = decode(node, "commit")?;
        Ok(Self {
            id: wire.oid,
            committed_date: wire.committed_date,
            additions: wire.additions,
            deletions: wire.deletions,
            author_login: wire.author.and_then(|a| a.user).map(|u| u.login),
        })
    }
}

fn decode<T: for<'de> Deserialize<'de>>(node: &Value, what: &str) -> QueryResult<T> {
    T::deserialize(node).map_err(|e| QueryError::Decode(format!("{what} node: {e}")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    name: String,
    owner: LoginNode,
    primary_language: Option<NameNode>,
    #[serde(default)]
    is_private: bool,
}

#[derive(Deserialize)]
struct BranchNode {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitNode {
    oid: String,
    committed_date: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    author: Option<AuthorNode>,
}

#[derive(Deserialize)]
struct AuthorNode {
    user: Option<LoginNode>,
}

#[derive(Deserialize)]
struct LoginNode {
    login: String,
}

#[derive(Deserialize)]
struct NameNode {
    name: String,
}
