//! Parsed catalog entities.
//!
//! A `RawRecord` off the wire becomes exactly one `Entity` here or a
//! `MalformedRecord` error; malformed records are skipped and counted by the
//! worker, never fatal to a work unit.

use chrono::{DateTime, Utc};
use magpie_schema::{CheckPayload, RawRecord, RecordKind};
use serde::{Deserialize, Serialize};

use crate::error::MagpieError;

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Repository(Repository),
    Issue(Issue),
    PullRequest(PullRequest),
    Comment(Comment),
    Review(Review),
    CiCheck(CiCheck),
}

impl Entity {
    /// Stable remote identity; shard routing hashes this.
    pub fn external_id(&self) -> &str {
        match self {
            Entity::Repository(r) => &r.external_id,
            Entity::Issue(i) => &i.external_id,
            Entity::PullRequest(p) => &p.external_id,
            Entity::Comment(c) => &c.external_id,
            Entity::Review(r) => &r.external_id,
            Entity::CiCheck(c) => &c.external_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub external_id: String,
    pub name_with_owner: String,
    pub star_count: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub external_id: String,
    pub repository_id: String,
    pub title: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub external_id: String,
    pub repository_id: String,
    pub title: String,
    pub state: String,
}

/// A comment belongs to exactly one issue or one pull request. The enum
/// makes zero-or-two-parent states unrepresentable past parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "external_id")]
pub enum ParentRef {
    Issue(String),
    PullRequest(String),
}

impl ParentRef {
    pub fn external_id(&self) -> &str {
        match self {
            ParentRef::Issue(id) | ParentRef::PullRequest(id) => id,
        }
    }

    /// Discriminator as stored in the `comments.parent_kind` column.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ParentRef::Issue(_) => "issue",
            ParentRef::PullRequest(_) => "pull_request",
        }
    }

    /// Parent table owning the summary counters.
    pub fn table(&self) -> &'static str {
        match self {
            ParentRef::Issue(_) => "issues",
            ParentRef::PullRequest(_) => "pull_requests",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub external_id: String,
    pub parent: ParentRef,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub external_id: String,
    pub pull_request_id: String,
    pub author: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CiCheck {
    pub external_id: String,
    pub pull_request_id: String,
    pub payload: CheckPayload,
}

impl TryFrom<RawRecord> for Entity {
    type Error = MagpieError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| MagpieError::MalformedRecord("node without id".to_string()))?;
        let kind = raw
            .kind
            .ok_or_else(|| MagpieError::MalformedRecord(format!("node {id} without kind")))?;

        match kind {
            RecordKind::Repository => Ok(Entity::Repository(Repository {
                name_with_owner: require(raw.name_with_owner, &id, "nameWithOwner")?,
                star_count: raw.star_count.unwrap_or(0),
                updated_at: raw.updated_at,
                external_id: id,
            })),

            RecordKind::Issue => Ok(Entity::Issue(Issue {
                repository_id: require(raw.repository_id, &id, "repositoryId")?,
                title: raw.title.unwrap_or_default(),
                state: raw.state.unwrap_or_default(),
                external_id: id,
            })),

            RecordKind::PullRequest => Ok(Entity::PullRequest(PullRequest {
                repository_id: require(raw.repository_id, &id, "repositoryId")?,
                title: raw.title.unwrap_or_default(),
                state: raw.state.unwrap_or_default(),
                external_id: id,
            })),

            RecordKind::Comment => {
                // Data-integrity invariant: exactly one parent reference.
                let parent = match (raw.issue_id, raw.pull_request_id) {
                    (Some(issue), None) => ParentRef::Issue(issue),
                    (None, Some(pr)) => ParentRef::PullRequest(pr),
                    (None, None) => {
                        return Err(MagpieError::MalformedRecord(format!(
                            "comment {id} has no parent reference"
                        )));
                    }
                    (Some(_), Some(_)) => {
                        return Err(MagpieError::MalformedRecord(format!(
                            "comment {id} references both an issue and a pull request"
                        )));
                    }
                };
                Ok(Entity::Comment(Comment {
                    external_id: id,
                    parent,
                    author: raw.author,
                }))
            }

            RecordKind::Review => Ok(Entity::Review(Review {
                pull_request_id: require(raw.pull_request_id, &id, "pullRequestId")?,
                author: raw.author,
                state: raw.state,
                external_id: id,
            })),

            RecordKind::CiCheck => Ok(Entity::CiCheck(CiCheck {
                pull_request_id: require(raw.pull_request_id, &id, "pullRequestId")?,
                payload: raw.check.ok_or_else(|| {
                    MagpieError::MalformedRecord(format!("check {id} without payload"))
                })?,
                external_id: id,
            })),
        }
    }
}

fn require(field: Option<String>, id: &str, name: &str) -> Result<String, MagpieError> {
    field
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| MagpieError::MalformedRecord(format!("node {id} missing {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawRecord {
        serde_json::from_value(value).expect("valid raw record json")
    }

    #[test]
    fn repository_node_parses() {
        let entity = Entity::try_from(raw(json!({
            "id": "R_1",
            "kind": "REPOSITORY",
            "nameWithOwner": "acme/widget",
            "starCount": 42,
        })))
        .expect("repository parses");

        match entity {
            Entity::Repository(repo) => {
                assert_eq!(repo.external_id, "R_1");
                assert_eq!(repo.name_with_owner, "acme/widget");
                assert_eq!(repo.star_count, 42);
            }
            other => panic!("expected repository, got {other:?}"),
        }
    }

    #[test]
    fn comment_with_single_parent_parses() {
        let entity = Entity::try_from(raw(json!({
            "id": "C_1",
            "kind": "COMMENT",
            "pullRequestId": "PR_9",
        })))
        .expect("comment parses");

        match entity {
            Entity::Comment(comment) => {
                assert_eq!(comment.parent, ParentRef::PullRequest("PR_9".to_string()));
            }
            other => panic!("expected comment, got {other:?}"),
        }
    }

    #[test]
    fn comment_without_parent_is_rejected() {
        let err = Entity::try_from(raw(json!({
            "id": "C_2",
            "kind": "COMMENT",
        })))
        .expect_err("orphan comment must be rejected");
        assert!(matches!(err, MagpieError::MalformedRecord(_)));
    }

    #[test]
    fn comment_with_two_parents_is_rejected() {
        let err = Entity::try_from(raw(json!({
            "id": "C_3",
            "kind": "COMMENT",
            "issueId": "I_1",
            "pullRequestId": "PR_1",
        })))
        .expect_err("double-parent comment must be rejected");
        assert!(matches!(err, MagpieError::MalformedRecord(_)));
    }

    #[test]
    fn node_without_id_is_rejected() {
        let err = Entity::try_from(raw(json!({
            "kind": "REPOSITORY",
            "nameWithOwner": "acme/widget",
        })))
        .expect_err("id is mandatory");
        assert!(matches!(err, MagpieError::MalformedRecord(_)));
    }

    #[test]
    fn check_payload_is_carried_opaque() {
        let entity = Entity::try_from(raw(json!({
            "id": "CHK_1",
            "kind": "CI_CHECK",
            "pullRequestId": "PR_2",
            "check": { "version": 2, "origin": "circleci", "data": { "steps": [1, 2, 3] } },
        })))
        .expect("check parses");

        match entity {
            Entity::CiCheck(check) => {
                assert_eq!(check.payload.version, 2);
                assert_eq!(check.payload.origin, "circleci");
                assert_eq!(check.payload.data, json!({ "steps": [1, 2, 3] }));
            }
            other => panic!("expected check, got {other:?}"),
        }
    }
}
