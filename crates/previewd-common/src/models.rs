use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a preview instance. Only `Running` and `Stopped` are ever
/// persisted: provisioning ends with the row insert and removal deletes the row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Provisioning,
    Running,
    Stopped,
    Removed,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }
}

impl FromStr for ContainerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(Self::Provisioning),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "removed" => Ok(Self::Removed),
            _ => Err(format!("Invalid container state: {}", s)),
        }
    }
}

/// Coarse permission level derived from container ownership.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Dev,
    User,
}

impl Role {
    /// `Dev` iff the caller owns the container.
    pub fn derive(caller_user_id: &str, owner_user_id: &str) -> Self {
        if caller_user_id == owner_user_id {
            Self::Dev
        } else {
            Self::User
        }
    }
}

/// Request to provision a new preview instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub source_url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub name: String,
    pub port: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub subdomain: String,
    pub url: String,
    pub owner_user_id: String,
    pub state: ContainerState,
    pub blob: serde_json::Value,
    pub created_at: String,
}

/// Identification pair handed to the reconciliation job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub subdomain: String,
}

/// Result of resolving a subdomain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRoute {
    pub container_id: String,
    pub owner_user_id: String,
}

/// Returned exactly once, when an identity is created.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserCredentials {
    pub id: String,
    pub secret: String,
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub user_id: String,
    pub thread_id: String,
    pub blob: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: String,
    pub emoji: String,
    pub user_id: String,
    pub comment_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentWithReactions {
    #[serde(flatten)]
    pub comment: Comment,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub container_id: String,
    pub user_id: Option<String>,
    pub order: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub blob: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: String,
    pub question_id: String,
    pub user_id: String,
    pub blob: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionWithAnswers {
    #[serde(flatten)]
    pub question: Question,
    pub answers: Vec<Answer>,
}
