//! Supported remote queries.
//!
//! Each [`Query`] variant carries its own typed parameters, the GraphQL
//! document to send, and where its paginated connection lives in the
//! response. [`Query::from_name`] is the string-keyed entry point used by
//! [`QueryClient::fetch`](crate::client::QueryClient::fetch).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{QueryError, QueryResult};

const REPOSITORY_LIST: &str = r#"
query($username: String!, $first: Int!, $after: String) {
    user(login: $username) {
        repositories(
            first: $first,
            after: $after,
            orderBy: {field: CREATED_AT, direction: DESC},
            ownerAffiliations: [OWNER],
            isFork: false
        ) {
            nodes {
                primaryLanguage { name }
                name
                owner { login }
                isPrivate
            }
            pageInfo { hasNextPage endCursor }
        }
    }
}
"#;

const BRANCH_LIST: &str = r#"
query($owner: String!, $name: String!, $first: Int!, $after: String) {
    repository(owner: $owner, name: $name) {
        refs(first: $first, after: $after, refPrefix: "refs/heads/") {
            nodes { name }
            pageInfo { hasNextPage endCursor }
        }
    }
}
"#;

const COMMIT_HISTORY: &str = r#"
query($owner: String!, $name: String!, $branch: String!, $first: Int!, $after: String) {
    repository(owner: $owner, name: $name) {
        ref(qualifiedName: $branch) {
            target {
                ... on Commit {
                    history(first: $first, after: $after) {
                        nodes {
                            committedDate
                            oid
                            additions
                            deletions
                            author { user { login } }
                        }
                        pageInfo { hasNextPage endCursor }
                    }
                }
            }
        }
    }
}
"#;

/// The kinds of query the client knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryKind {
    /// Repositories owned by a user.
    RepositoryList,
    /// Branches of one repository.
    BranchList,
    /// Commit history of one branch.
    CommitHistory,
}

impl QueryKind {
    /// All kinds, in pipeline order.
    pub const ALL: [Self; 3] = [Self::RepositoryList, Self::BranchList, Self::CommitHistory];

    /// External name used in `fetch` and cache keys.
    pub const fn name(self) -> &'static str {
        match self {
            Self::RepositoryList => "repository-list",
            Self::BranchList => "branch-list",
            Self::CommitHistory => "commit-history",
        }
    }

    /// Parameters that must be present and non-empty.
    pub const fn required_params(self) -> &'static [&'static str] {
        match self {
            Self::RepositoryList => &["username"],
            Self::BranchList => &["owner", "repositoryName"],
            Self::CommitHistory => &["owner", "repositoryName", "branch"],
        }
    }

    /// Look up a kind by its external name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    const fn document(self) -> &'static str {
        match self {
            Self::RepositoryList => REPOSITORY_LIST,
            Self::BranchList => BRANCH_LIST,
            Self::CommitHistory => COMMIT_HISTORY,
        }
    }

    const fn connection_path(self) -> &'static [&'static str] {
        match self {
            Self::RepositoryList => &["user", "repositories"],
            Self::BranchList => &["repository", "refs"],
            Self::CommitHistory => &["repository", "ref", "target", "history"],
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully parameterized query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// Repositories owned by `username`.
    RepositoryList {
        /// Target login.
        username: String,
    },
    /// Branches of `owner/repository`.
    BranchList {
        /// Repository owner login.
        owner: String,
        /// Repository name.
        repository: String,
    },
    /// History of `branch` in `owner/repository`.
    CommitHistory {
        /// Repository owner login.
        owner: String,
        /// Repository name.
        repository: String,
        /// Short branch name.
        branch: String,
    },
}

impl Query {
    /// Build a query from its external name and a parameter map.
    ///
    /// Control characters are stripped from every value before the
    /// emptiness check, so a value made only of control characters is
    /// rejected.
    pub fn from_name(name: &str, params: &BTreeMap<String, String>) -> QueryResult<Self> {
        let kind = QueryKind::from_name(name)
            .ok_or_else(|| QueryError::Validation(format!("unknown query: {name:?}")))?;

        let param = |key: &str| -> QueryResult<String> {
            let raw = params.get(key).ok_or_else(|| {
                QueryError::Validation(format!("{kind}: missing parameter {key:?}"))
            })?;
            sanitize(kind, key, raw)
        };

        Ok(match kind {
            QueryKind::RepositoryList => Self::RepositoryList {
                username: param("username")?,
            },
            QueryKind::BranchList => Self::BranchList {
                owner: param("owner")?,
                repository: param("repositoryName")?,
            },
            QueryKind::CommitHistory => Self::CommitHistory {
                owner: param("owner")?,
                repository: param("repositoryName")?,
                branch: param("branch")?,
            },
        })
    }

    /// Re-run parameter sanitization on an already-typed query.
    pub fn validated(self) -> QueryResult<Self> {
        Self::from_name(self.kind().name(), &self.params())
    }

    /// The kind of this query.
    pub const fn kind(&self) -> QueryKind {
        match self {
            Self::RepositoryList { .. } => QueryKind::RepositoryList,
            Self::BranchList { .. } => QueryKind::BranchList,
            Self::CommitHistory { .. } => QueryKind::CommitHistory,
        }
    }

    /// Canonical parameter map (external names), sorted by key.
    pub fn params(&self) -> BTreeMap<String, String> {
        let pairs: Vec<(&str, &str)> = match self {
            Self::RepositoryList { username } => vec![("username", username)],
            Self::BranchList { owner, repository } => {
                vec![("owner", owner), ("repositoryName", repository)]
            }
            Self::CommitHistory {
                owner,
                repository,
                branch,
            } => vec![
                ("owner", owner),
                ("repositoryName", repository),
                ("branch", branch),
            ],
        };
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Request body for one page.
    pub fn request_body(&self, page_size: u32, after: Option<&str>) -> Value {
        let mut variables = match self {
            Self::RepositoryList { username } => json!({ "username": username }),
            Self::BranchList { owner, repository } => json!({ "owner": owner, "name": repository }),
            Self::CommitHistory {
                owner,
                repository,
                branch,
            } => json!({ "owner": owner, "name": repository, "branch": branch }),
        };
        variables["first"] = json!(page_size);
        variables["after"] = after.map_or(Value::Null, |c| json!(c));
        json!({ "query": self.kind().document(), "variables": variables })
    }

    /// Extract one page from a response's `data` object.
    pub fn page(&self, data: &Value) -> QueryResult<Page> {
        let path = self.kind().connection_path();
        let mut cursor = data;
        for segment in path {
            cursor = cursor.get(segment).filter(|v| !v.is_null()).ok_or_else(|| {
                QueryError::Decode(format!(
                    "{}: missing {} in response",
                    self.kind(),
                    path.join(".")
                ))
            })?;
        }
        let connection: Connection = Connection::deserialize(cursor)
            .map_err(|e| QueryError::Decode(format!("{}: {e}", self.kind())))?;

        let end_cursor = connection
            .page_info
            .as_ref()
            .filter(|info| info.has_next_page)
            .and_then(|info| info.end_cursor.clone());
        Ok(Page {
            nodes: connection.nodes.into_iter().filter(|n| !n.is_null()).collect(),
            next_cursor: end_cursor,
        })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RepositoryList { username } => write!(f, "repository-list({username})"),
            Self::BranchList { owner, repository } => {
                write!(f, "branch-list({owner}/{repository})")
            }
            Self::CommitHistory {
                owner,
                repository,
                branch,
            } => write!(f, "commit-history({owner}/{repository}@{branch})"),
        }
    }
}

/// One page of nodes plus the cursor for the next, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Nodes in server order.
    pub nodes: Vec<Value>,
    /// Cursor to pass as `after`; `None` on the last page.
    pub next_cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    #[serde(default)]
    nodes: Vec<Value>,
    page_info: Option<PageInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// Clean a GitHub login the same way query parameters are cleaned.
pub fn sanitize_login(raw: &str) -> QueryResult<String> {
    sanitize(QueryKind::RepositoryList, "username", raw)
}

fn sanitize(kind: QueryKind, key: &str, raw: &str) -> QueryResult<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(QueryError::Validation(format!(
            "{kind}: parameter {key:?} is empty"
        )));
    }
    Ok(cleaned.to_string())
}
