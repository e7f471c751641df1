//! Typed CRUD over the [`StorageBackend`] contract.
//!
//! Every statement here is written once, in the dialect subset both backends
//! accept, and bound positionally. Row structs mirror the select lists and are
//! converted to the shared models with `into_*` methods.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use previewd_common::validate::{new_id, new_secret, validate_order_ids};
use previewd_common::{
    Answer, Comment, CommentWithReactions, ContainerRecord, ContainerRoute, ContainerState,
    ContainerSummary, PreviewError, PreviewResult, Question, QuestionWithAnswers, Reaction, UserCredentials,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Row, Statement, StorageBackend, group_rows};
use crate::params;

/// No-op write that holds the container row lock until the batch commits, so
/// question-order batches on one container run one after another.
fn lock_container(container_id: &str) -> Statement {
    Statement::new(
        "UPDATE containers SET state = state WHERE id = ?",
        params![container_id],
    )
}

fn from_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    serde_json::from_value(Value::Object(row)).context("Failed to decode row")
}

/// Stored blobs are JSON text; a missing blob reads back as `{}`.
fn parse_blob(raw: Option<String>) -> Result<Value> {
    match raw {
        None => Ok(Value::Object(Default::default())),
        Some(text) => {
            let value: Value = serde_json::from_str(&text).context("Corrupt blob column")?;
            Ok(if value.is_null() {
                Value::Object(Default::default())
            } else {
                value
            })
        }
    }
}

fn blob_text(blob: &Value) -> String {
    if blob.is_null() {
        "{}".to_string()
    } else {
        blob.to_string()
    }
}

fn count(rows: &[Row]) -> i64 {
    rows.first()
        .and_then(|r| r.get("n"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

#[derive(Deserialize)]
struct ContainerRow {
    id: String,
    subdomain: String,
    url: String,
    user_id: String,
    state: String,
    blob: Option<String>,
    created_at: String,
}

impl ContainerRow {
    fn into_record(self) -> Result<ContainerRecord> {
        Ok(ContainerRecord {
            state: self.state.parse().map_err(anyhow::Error::msg)?,
            blob: parse_blob(self.blob)?,
            id: self.id,
            subdomain: self.subdomain,
            url: self.url,
            owner_user_id: self.user_id,
            created_at: self.created_at,
        })
    }
}

#[derive(Deserialize)]
struct CommentRow {
    id: String,
    text: String,
    user_id: String,
    thread_id: String,
    blob: Option<String>,
    created_at: String,
    reaction_id: Option<String>,
    reaction_emoji: Option<String>,
    reaction_user_id: Option<String>,
    reaction_created_at: Option<String>,
}

impl CommentRow {
    fn comment(&self) -> Result<Comment> {
        Ok(Comment {
            id: self.id.clone(),
            text: self.text.clone(),
            user_id: self.user_id.clone(),
            thread_id: self.thread_id.clone(),
            blob: parse_blob(self.blob.clone())?,
            created_at: self.created_at.clone(),
        })
    }

    fn into_reaction(self) -> Option<Reaction> {
        Some(Reaction {
            id: self.reaction_id?,
            emoji: self.reaction_emoji?,
            user_id: self.reaction_user_id?,
            comment_id: self.id,
            created_at: self.reaction_created_at.unwrap_or_default(),
        })
    }
}

#[derive(Deserialize)]
struct ReactionRow {
    id: String,
    emoji: String,
    user_id: String,
    comment_id: String,
    created_at: String,
}

impl ReactionRow {
    fn into_reaction(self) -> Reaction {
        Reaction {
            id: self.id,
            emoji: self.emoji,
            user_id: self.user_id,
            comment_id: self.comment_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Deserialize)]
struct QuestionRow {
    id: String,
    container_id: String,
    user_id: Option<String>,
    order_id: i64,
    #[serde(rename = "type")]
    kind: String,
    text: String,
    blob: Option<String>,
    created_at: String,
    #[serde(default)]
    answer_id: Option<String>,
    #[serde(default)]
    answer_user_id: Option<String>,
    #[serde(default)]
    answer_blob: Option<String>,
    #[serde(default)]
    answer_created_at: Option<String>,
}

impl QuestionRow {
    fn question(&self) -> Result<Question> {
        Ok(Question {
            id: self.id.clone(),
            container_id: self.container_id.clone(),
            user_id: self.user_id.clone(),
            order: self.order_id,
            kind: self.kind.clone(),
            text: self.text.clone(),
            blob: parse_blob(self.blob.clone())?,
            created_at: self.created_at.clone(),
        })
    }

    fn into_answer(self) -> Result<Option<Answer>> {
        let (Some(id), Some(user_id)) = (self.answer_id, self.answer_user_id) else {
            return Ok(None);
        };
        Ok(Some(Answer {
            id,
            question_id: self.id,
            user_id,
            blob: parse_blob(self.answer_blob)?,
            created_at: self.answer_created_at.unwrap_or_default(),
        }))
    }
}

#[derive(Deserialize)]
struct AnswerRow {
    id: String,
    question_id: String,
    user_id: String,
    blob: Option<String>,
    created_at: String,
}

impl AnswerRow {
    fn into_answer(self) -> Result<Answer> {
        Ok(Answer {
            id: self.id,
            question_id: self.question_id,
            user_id: self.user_id,
            blob: parse_blob(self.blob)?,
            created_at: self.created_at,
        })
    }
}

/// Fields of a container row written when provisioning succeeds.
#[derive(Debug, Clone)]
pub struct NewContainer {
    pub id: String,
    pub subdomain: String,
    pub url: String,
    pub owner_user_id: String,
    pub password_hash: Option<String>,
    pub blob: Value,
}

const CONTAINER_COLUMNS: &str = "id, subdomain, url, user_id, state, blob, created_at";

const COMMENT_SELECT: &str = "SELECT c.id AS id, c.text AS text, c.user_id AS user_id, \
     c.thread_id AS thread_id, c.blob AS blob, c.created_at AS created_at, \
     r.id AS reaction_id, r.emoji AS reaction_emoji, r.user_id AS reaction_user_id, \
     r.created_at AS reaction_created_at \
     FROM comments c \
     INNER JOIN threads t ON t.id = c.thread_id \
     LEFT JOIN reactions r ON r.comment_id = c.id";

const COMMENT_ORDER: &str = "ORDER BY c.created_at, c.id, r.created_at, r.id";

const QUESTION_COLUMNS: &str =
    "id, container_id, user_id, order_id, type, text, blob, created_at";

/// Typed access to every persisted entity. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StorageBackend>,
}

impl Store {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    // ── Users ──────────────────────────────────────────────────────────

    /// Mint a fresh anonymous identity. The secret is only ever returned here.
    pub async fn add_user(&self, name: Option<&str>) -> Result<UserCredentials> {
        let credentials = UserCredentials {
            id: new_id(),
            secret: new_secret(),
        };
        self.backend
            .run(
                "INSERT INTO users (id, name, secret) VALUES (?, ?, ?)",
                params![&credentials.id, name, &credentials.secret],
            )
            .await
            .context("Failed to insert user")?;
        Ok(credentials)
    }

    pub async fn verify_user(&self, user_id: &str, secret: &str) -> Result<bool> {
        let rows = self
            .backend
            .query(
                "SELECT COUNT(*) AS n FROM users WHERE id = ? AND secret = ?",
                params![user_id, secret],
            )
            .await
            .context("Failed to verify user")?;
        Ok(count(&rows) > 0)
    }

    // ── Containers ─────────────────────────────────────────────────────

    /// Write the row for a container that is already running. A taken
    /// subdomain surfaces as a `UniqueViolation` in the error chain.
    pub async fn insert_container(&self, new: &NewContainer) -> Result<ContainerRecord> {
        self.backend
            .run(
                "INSERT INTO containers (id, subdomain, url, user_id, state, password_hash, blob) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    &new.id,
                    &new.subdomain,
                    &new.url,
                    &new.owner_user_id,
                    ContainerState::Running.as_str(),
                    new.password_hash.clone(),
                    blob_text(&new.blob),
                ],
            )
            .await
            .context("Failed to insert container")?;
        self.get_container(&new.id)
            .await?
            .with_context(|| format!("Container {} vanished after insert", new.id))
    }

    pub async fn get_container(&self, id: &str) -> Result<Option<ContainerRecord>> {
        let rows = self
            .backend
            .query(
                &format!("SELECT {} FROM containers WHERE id = ?", CONTAINER_COLUMNS),
                params![id],
            )
            .await
            .context("Failed to load container")?;
        rows.into_iter()
            .next()
            .map(|row| from_row::<ContainerRow>(row)?.into_record())
            .transpose()
    }

    pub async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<ContainerRoute>> {
        let rows = self
            .backend
            .query(
                "SELECT id, user_id FROM containers WHERE subdomain = ?",
                params![subdomain],
            )
            .await
            .context("Failed to resolve subdomain")?;
        Ok(rows.into_iter().next().and_then(|row| {
            Some(ContainerRoute {
                container_id: row.get("id")?.as_str()?.to_string(),
                owner_user_id: row.get("user_id")?.as_str()?.to_string(),
            })
        }))
    }

    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let rows = self
            .backend
            .query(
                "SELECT id, subdomain FROM containers ORDER BY created_at, id",
                params![],
            )
            .await
            .context("Failed to list containers")?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn list_containers_by_user(&self, user_id: &str) -> Result<Vec<ContainerRecord>> {
        let rows = self
            .backend
            .query(
                &format!(
                    "SELECT {} FROM containers WHERE user_id = ? ORDER BY created_at, id",
                    CONTAINER_COLUMNS
                ),
                params![user_id],
            )
            .await
            .context("Failed to list containers for user")?;
        rows.into_iter()
            .map(|row| from_row::<ContainerRow>(row)?.into_record())
            .collect()
    }

    pub async fn set_container_state(&self, id: &str, state: ContainerState) -> Result<u64> {
        self.backend
            .run(
                "UPDATE containers SET state = ? WHERE id = ?",
                params![state.as_str(), id],
            )
            .await
            .context("Failed to update container state")
    }

    /// Delete the row; threads, comments, questions and answers cascade.
    pub async fn remove_container(&self, id: &str) -> Result<u64> {
        self.backend
            .run("DELETE FROM containers WHERE id = ?", params![id])
            .await
            .context("Failed to remove container")
    }

    /// Stored password digest; `None` when the subdomain is unknown or unprotected.
    pub async fn container_password_hash(&self, subdomain: &str) -> Result<Option<String>> {
        let rows = self
            .backend
            .query(
                "SELECT password_hash FROM containers WHERE subdomain = ?",
                params![subdomain],
            )
            .await
            .context("Failed to load container password")?;
        Ok(rows
            .first()
            .and_then(|r| r.get("password_hash"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    // ── Threads ────────────────────────────────────────────────────────

    pub async fn add_thread(&self, container_id: &str, blob: &Value) -> Result<String> {
        let id = new_id();
        self.backend
            .run(
                "INSERT INTO threads (id, container_id, blob) VALUES (?, ?, ?)",
                params![&id, container_id, blob_text(blob)],
            )
            .await
            .context("Failed to insert thread")?;
        Ok(id)
    }

    /// Owning container of a thread.
    pub async fn thread_container(&self, thread_id: &str) -> Result<Option<String>> {
        let rows = self
            .backend
            .query(
                "SELECT container_id FROM threads WHERE id = ?",
                params![thread_id],
            )
            .await
            .context("Failed to load thread")?;
        Ok(rows
            .first()
            .and_then(|r| r.get("container_id"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    // ── Comments ───────────────────────────────────────────────────────

    pub async fn add_comment(
        &self,
        thread_id: &str,
        user_id: &str,
        text: &str,
        blob: &Value,
    ) -> Result<String> {
        let id = new_id();
        self.backend
            .run(
                "INSERT INTO comments (id, text, user_id, thread_id, blob) VALUES (?, ?, ?, ?, ?)",
                params![&id, text, user_id, thread_id, blob_text(blob)],
            )
            .await
            .context("Failed to insert comment")?;
        Ok(id)
    }

    async fn comments_where(
        &self,
        filter: &str,
        params: Vec<super::Param>,
    ) -> Result<Vec<CommentWithReactions>> {
        let sql = format!("{} WHERE {} {}", COMMENT_SELECT, filter, COMMENT_ORDER);
        let rows = self
            .backend
            .query(&sql, params)
            .await
            .context("Failed to load comments")?;
        let mut out = Vec::new();
        for group in group_rows(rows, "id") {
            let parsed = group
                .into_iter()
                .map(from_row::<CommentRow>)
                .collect::<Result<Vec<_>>>()?;
            let comment = parsed[0].comment()?;
            let reactions = parsed
                .into_iter()
                .filter_map(CommentRow::into_reaction)
                .collect();
            out.push(CommentWithReactions { comment, reactions });
        }
        Ok(out)
    }

    /// Every comment on the container, oldest first, each with its reactions.
    pub async fn get_comments(&self, container_id: &str) -> Result<Vec<CommentWithReactions>> {
        self.comments_where("t.container_id = ?", params![container_id])
            .await
    }

    pub async fn get_thread_comments(
        &self,
        container_id: &str,
        thread_id: &str,
    ) -> Result<Vec<CommentWithReactions>> {
        self.comments_where(
            "t.container_id = ? AND c.thread_id = ?",
            params![container_id, thread_id],
        )
        .await
    }

    /// Owning container of a comment.
    pub async fn comment_container(&self, comment_id: &str) -> Result<Option<String>> {
        let rows = self
            .backend
            .query(
                "SELECT t.container_id AS container_id FROM comments c \
                 INNER JOIN threads t ON t.id = c.thread_id WHERE c.id = ?",
                params![comment_id],
            )
            .await
            .context("Failed to load comment")?;
        Ok(rows
            .first()
            .and_then(|r| r.get("container_id"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    /// Delete a comment scoped to its container, optionally restricted to its
    /// author. Returns the number of rows removed.
    pub async fn delete_comment(
        &self,
        container_id: &str,
        comment_id: &str,
        author: Option<&str>,
    ) -> Result<u64> {
        let scope = "DELETE FROM comments WHERE id = ? \
                     AND thread_id IN (SELECT id FROM threads WHERE container_id = ?)";
        let result = match author {
            Some(user_id) => {
                self.backend
                    .run(
                        &format!("{} AND user_id = ?", scope),
                        params![comment_id, container_id, user_id],
                    )
                    .await
            }
            None => {
                self.backend
                    .run(scope, params![comment_id, container_id])
                    .await
            }
        };
        result.context("Failed to delete comment")
    }

    // ── Reactions ──────────────────────────────────────────────────────

    pub async fn add_reaction(&self, comment_id: &str, user_id: &str, emoji: &str) -> Result<String> {
        let id = new_id();
        self.backend
            .run(
                "INSERT INTO reactions (id, emoji, user_id, comment_id) VALUES (?, ?, ?, ?)",
                params![&id, emoji, user_id, comment_id],
            )
            .await
            .context("Failed to insert reaction")?;
        Ok(id)
    }

    /// Remove reactions matching the exact (emoji, user, comment) triple.
    pub async fn delete_reaction(&self, emoji: &str, user_id: &str, comment_id: &str) -> Result<u64> {
        self.backend
            .run(
                "DELETE FROM reactions WHERE emoji = ? AND user_id = ? AND comment_id = ?",
                params![emoji, user_id, comment_id],
            )
            .await
            .context("Failed to delete reaction")
    }

    pub async fn get_comment_reactions(&self, comment_id: &str) -> Result<Vec<Reaction>> {
        let rows = self
            .backend
            .query(
                "SELECT id, emoji, user_id, comment_id, created_at FROM reactions \
                 WHERE comment_id = ? ORDER BY created_at, id",
                params![comment_id],
            )
            .await
            .context("Failed to load reactions")?;
        rows.into_iter()
            .map(|row| from_row::<ReactionRow>(row).map(ReactionRow::into_reaction))
            .collect()
    }

    // ── Questions ──────────────────────────────────────────────────────

    pub async fn question_highest_order(&self, container_id: &str) -> Result<Option<i64>> {
        let rows = self
            .backend
            .query(
                "SELECT MAX(order_id) AS m FROM questions WHERE container_id = ?",
                params![container_id],
            )
            .await
            .context("Failed to load question order")?;
        Ok(rows.first().and_then(|r| r.get("m")).and_then(Value::as_i64))
    }

    /// Append a question after the current last one (order 0 when none exist).
    pub async fn add_question(
        &self,
        container_id: &str,
        user_id: Option<&str>,
        kind: &str,
        text: &str,
        blob: &Value,
    ) -> Result<Question> {
        let id = new_id();
        self.backend
            .run_batch(vec![
                lock_container(container_id),
                Statement::new(
                    "INSERT INTO questions (id, container_id, user_id, order_id, type, text, blob) \
                     SELECT ?, ?, ?, COALESCE(MAX(order_id), -1) + 1, ?, ?, ? \
                     FROM questions WHERE container_id = ?",
                    params![&id, container_id, user_id, kind, text, blob_text(blob), container_id],
                ),
            ])
            .await
            .context("Failed to insert question")?;
        self.get_question(container_id, &id)
            .await?
            .with_context(|| format!("Question {} vanished after insert", id))
    }

    pub async fn get_question(&self, container_id: &str, id: &str) -> Result<Option<Question>> {
        let rows = self
            .backend
            .query(
                &format!(
                    "SELECT {} FROM questions WHERE id = ? AND container_id = ?",
                    QUESTION_COLUMNS
                ),
                params![id, container_id],
            )
            .await
            .context("Failed to load question")?;
        rows.into_iter()
            .next()
            .map(|row| from_row::<QuestionRow>(row)?.question())
            .transpose()
    }

    pub async fn edit_question(
        &self,
        container_id: &str,
        id: &str,
        kind: &str,
        text: &str,
        blob: &Value,
    ) -> Result<u64> {
        self.backend
            .run(
                "UPDATE questions SET type = ?, text = ?, blob = ? WHERE id = ? AND container_id = ?",
                params![kind, text, blob_text(blob), id, container_id],
            )
            .await
            .context("Failed to update question")
    }

    pub async fn remove_question(&self, container_id: &str, id: &str) -> Result<u64> {
        self.backend
            .run(
                "DELETE FROM questions WHERE id = ? AND container_id = ?",
                params![id, container_id],
            )
            .await
            .context("Failed to remove question")
    }

    pub async fn get_questions(&self, container_id: &str) -> Result<Vec<Question>> {
        let rows = self
            .backend
            .query(
                &format!(
                    "SELECT {} FROM questions WHERE container_id = ? ORDER BY order_id, id",
                    QUESTION_COLUMNS
                ),
                params![container_id],
            )
            .await
            .context("Failed to load questions")?;
        rows.into_iter()
            .map(|row| from_row::<QuestionRow>(row)?.question())
            .collect()
    }

    /// Questions in display order, each with every answer given to it.
    pub async fn get_questions_with_answers(
        &self,
        container_id: &str,
    ) -> Result<Vec<QuestionWithAnswers>> {
        let rows = self
            .backend
            .query(
                "SELECT q.id AS id, q.container_id AS container_id, q.user_id AS user_id, \
                 q.order_id AS order_id, q.type AS type, q.text AS text, q.blob AS blob, \
                 q.created_at AS created_at, a.id AS answer_id, a.user_id AS answer_user_id, \
                 a.blob AS answer_blob, a.created_at AS answer_created_at \
                 FROM questions q LEFT JOIN answers a ON a.question_id = q.id \
                 WHERE q.container_id = ? \
                 ORDER BY q.order_id, q.id, a.created_at, a.id",
                params![container_id],
            )
            .await
            .context("Failed to load questions with answers")?;
        let mut out = Vec::new();
        for group in group_rows(rows, "id") {
            let parsed = group
                .into_iter()
                .map(from_row::<QuestionRow>)
                .collect::<Result<Vec<_>>>()?;
            let question = parsed[0].question()?;
            let mut answers = Vec::new();
            for row in parsed {
                if let Some(answer) = row.into_answer()? {
                    answers.push(answer);
                }
            }
            out.push(QuestionWithAnswers { question, answers });
        }
        Ok(out)
    }

    /// Owning container of a question.
    pub async fn question_container(&self, question_id: &str) -> Result<Option<String>> {
        let rows = self
            .backend
            .query(
                "SELECT container_id FROM questions WHERE id = ?",
                params![question_id],
            )
            .await
            .context("Failed to load question")?;
        Ok(rows
            .first()
            .and_then(|r| r.get("container_id"))
            .and_then(Value::as_str)
            .map(String::from))
    }

    /// Rewrite `order_id` to each id's position in `ids`, atomically. `ids`
    /// must name every question of the container exactly once; anything else
    /// is rejected before a single row is written. Returns the questions moved.
    pub async fn reorder_questions(&self, container_id: &str, ids: &[String]) -> PreviewResult<u64> {
        validate_order_ids(ids)?;
        let current: HashSet<String> = self
            .get_questions(container_id)
            .await?
            .into_iter()
            .map(|q| q.id)
            .collect();
        let mut seen = HashSet::with_capacity(ids.len());
        let complete = ids.len() == current.len()
            && ids.iter().all(|id| current.contains(id) && seen.insert(id.as_str()));
        if !complete {
            return Err(PreviewError::bad_request(
                "Order must list every question of the instance exactly once",
            ));
        }

        let mut statements = vec![lock_container(container_id)];
        statements.extend(ids.iter().enumerate().map(|(position, id)| {
            Statement::new(
                "UPDATE questions SET order_id = ? WHERE id = ? AND container_id = ?",
                params![position as i64, id, container_id],
            )
        }));
        let updated = self
            .backend
            .run_batch(statements)
            .await
            .context("Failed to reorder questions")?;
        // The lock statement touches the container row itself.
        Ok(updated.saturating_sub(1))
    }

    // ── Answers ────────────────────────────────────────────────────────

    /// Record a user's answer, overwriting any earlier one for the question.
    pub async fn upsert_answer(&self, question_id: &str, user_id: &str, blob: &Value) -> Result<String> {
        self.backend
            .run(
                "INSERT INTO answers (id, question_id, user_id, blob) VALUES (?, ?, ?, ?) \
                 ON CONFLICT (user_id, question_id) DO UPDATE SET blob = excluded.blob",
                params![new_id(), question_id, user_id, blob_text(blob)],
            )
            .await
            .context("Failed to save answer")?;
        let answer = self
            .get_answer(question_id, user_id)
            .await?
            .context("Answer vanished after upsert")?;
        Ok(answer.id)
    }

    pub async fn get_answer(&self, question_id: &str, user_id: &str) -> Result<Option<Answer>> {
        let rows = self
            .backend
            .query(
                "SELECT id, question_id, user_id, blob, created_at FROM answers \
                 WHERE question_id = ? AND user_id = ?",
                params![question_id, user_id],
            )
            .await
            .context("Failed to load answer")?;
        rows.into_iter()
            .next()
            .map(|row| from_row::<AnswerRow>(row)?.into_answer())
            .transpose()
    }
}
