//! Presence tracking and cell comments for tabular reviews.
//!
//! Presence entries expire after 60 seconds; the in-memory store sweeps
//! on read. An external KV can replace the map without changing callers.
//! Comment threads are append-only per `(review_id, file_id, column_id)`;
//! only the author edits a comment, the review owner deletes, anyone with
//! review access resolves or unresolves.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

const PRESENCE_TTL: Duration = Duration::from_secs(60);

/// One present user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceEntry {
    pub user_id: String,
    pub user_name: String,
    pub last_seen: DateTime<Utc>,
}

struct TrackedPresence {
    entry: PresenceEntry,
    seen_at: Instant,
}

/// Per-review presence set with a 60 second TTL.
#[derive(Default)]
pub struct PresenceTracker {
    reviews: Mutex<HashMap<String, HashMap<String, TrackedPresence>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a user is looking at a review.
    pub fn update(&self, review_id: &str, user_id: &str, user_name: Option<&str>) {
        let mut reviews = self.reviews.lock();
        reviews
            .entry(review_id.to_string())
            .or_default()
            .insert(
                user_id.to_string(),
                TrackedPresence {
                    entry: PresenceEntry {
                        user_id: user_id.to_string(),
                        user_name: user_name.unwrap_or(user_id).to_string(),
                        last_seen: Utc::now(),
                    },
                    seen_at: Instant::now(),
                },
            );
    }

    /// Users currently present, sweeping expired entries.
    pub fn present_users(&self, review_id: &str) -> Vec<PresenceEntry> {
        let mut reviews = self.reviews.lock();
        let Some(review) = reviews.get_mut(review_id) else {
            return Vec::new();
        };
        review.retain(|_, tracked| tracked.seen_at.elapsed() < PRESENCE_TTL);

        let mut entries: Vec<PresenceEntry> =
            review.values().map(|t| t.entry.clone()).collect();
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        entries
    }

    /// Explicitly remove a user (tab closed).
    pub fn remove(&self, review_id: &str, user_id: &str) {
        if let Some(review) = self.reviews.lock().get_mut(review_id) {
            review.remove(user_id);
        }
    }
}

/// One comment in a cell thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellComment {
    pub comment_id: String,
    pub review_id: String,
    pub file_id: String,
    pub column_id: String,
    pub text: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub is_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

type ThreadKey = (String, String, String);

/// Append-only comment threads on structured cells.
#[derive(Default)]
pub struct CellCommentService {
    threads: Mutex<HashMap<ThreadKey, Vec<CellComment>>>,
}

impl CellCommentService {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(review_id: &str, file_id: &str, column_id: &str) -> ThreadKey {
        (
            review_id.to_string(),
            file_id.to_string(),
            column_id.to_string(),
        )
    }

    pub fn create(
        &self,
        review_id: &str,
        file_id: &str,
        column_id: &str,
        text: &str,
        user_id: &str,
    ) -> CellComment {
        let comment = CellComment {
            comment_id: Uuid::new_v4().to_string(),
            review_id: review_id.to_string(),
            file_id: file_id.to_string(),
            column_id: column_id.to_string(),
            text: text.to_string(),
            created_by: user_id.to_string(),
            created_at: Utc::now(),
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
        };
        self.threads
            .lock()
            .entry(Self::key(review_id, file_id, column_id))
            .or_default()
            .push(comment.clone());
        comment
    }

    /// Thread for one cell, newest first. Resolved comments are filtered
    /// out unless requested.
    pub fn list(
        &self,
        review_id: &str,
        file_id: &str,
        column_id: &str,
        include_resolved: bool,
    ) -> Vec<CellComment> {
        let threads = self.threads.lock();
        let mut comments: Vec<CellComment> = threads
            .get(&Self::key(review_id, file_id, column_id))
            .map(|t| {
                t.iter()
                    .filter(|c| include_resolved || !c.is_resolved)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        comments
    }

    /// Edit a comment's text. Only the author may edit.
    pub fn edit(&self, comment_id: &str, new_text: &str, user_id: &str) -> Result<(), String> {
        let mut threads = self.threads.lock();
        for thread in threads.values_mut() {
            if let Some(comment) = thread.iter_mut().find(|c| c.comment_id == comment_id) {
                if comment.created_by != user_id {
                    return Err("only the author may edit a comment".into());
                }
                comment.text = new_text.to_string();
                return Ok(());
            }
        }
        Err(format!("comment {comment_id} not found"))
    }

    /// Delete a comment. Only the review owner may delete.
    pub fn delete(
        &self,
        comment_id: &str,
        user_id: &str,
        review_owner: &str,
    ) -> Result<(), String> {
        if user_id != review_owner {
            return Err("only the review owner may delete comments".into());
        }
        let mut threads = self.threads.lock();
        for thread in threads.values_mut() {
            let before = thread.len();
            thread.retain(|c| c.comment_id != comment_id);
            if thread.len() < before {
                return Ok(());
            }
        }
        Err(format!("comment {comment_id} not found"))
    }

    /// Flip resolution. Anyone with review access may resolve or
    /// unresolve.
    pub fn set_resolved(
        &self,
        comment_id: &str,
        resolved: bool,
        user_id: &str,
    ) -> Result<(), String> {
        let mut threads = self.threads.lock();
        for thread in threads.values_mut() {
            if let Some(comment) = thread.iter_mut().find(|c| c.comment_id == comment_id) {
                comment.is_resolved = resolved;
                if resolved {
                    comment.resolved_by = Some(user_id.to_string());
                    comment.resolved_at = Some(Utc::now());
                } else {
                    comment.resolved_by = None;
                    comment.resolved_at = None;
                }
                return Ok(());
            }
        }
        Err(format!("comment {comment_id} not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_update_and_listing() {
        let tracker = PresenceTracker::new();
        tracker.update("r1", "u1", Some("Анна"));
        tracker.update("r1", "u2", None);
        tracker.update("r2", "u3", None);

        let present = tracker.present_users("r1");
        assert_eq!(present.len(), 2);
        assert_eq!(present[0].user_name, "Анна");
        assert_eq!(tracker.present_users("r2").len(), 1);

        tracker.remove("r1", "u1");
        assert_eq!(tracker.present_users("r1").len(), 1);
    }

    #[test]
    fn test_comment_thread_roundtrip() {
        let service = CellCommentService::new();
        let comment = service.create("r1", "f1", "amount", "проверь сумму", "u1");

        let thread = service.list("r1", "f1", "amount", false);
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].comment_id, comment.comment_id);

        // Other cells have separate threads.
        assert!(service.list("r1", "f1", "date", false).is_empty());
    }

    #[test]
    fn test_only_author_edits() {
        let service = CellCommentService::new();
        let comment = service.create("r1", "f1", "amount", "text", "u1");

        assert!(service.edit(&comment.comment_id, "edited", "u2").is_err());
        assert!(service.edit(&comment.comment_id, "edited", "u1").is_ok());
        assert_eq!(service.list("r1", "f1", "amount", false)[0].text, "edited");
    }

    #[test]
    fn test_only_owner_deletes() {
        let service = CellCommentService::new();
        let comment = service.create("r1", "f1", "amount", "text", "u1");

        assert!(service.delete(&comment.comment_id, "u1", "owner").is_err());
        assert!(service.delete(&comment.comment_id, "owner", "owner").is_ok());
        assert!(service.list("r1", "f1", "amount", true).is_empty());
    }

    #[test]
    fn test_anyone_resolves_and_unresolves() {
        let service = CellCommentService::new();
        let comment = service.create("r1", "f1", "amount", "text", "u1");

        service.set_resolved(&comment.comment_id, true, "u2").unwrap();
        let resolved = &service.list("r1", "f1", "amount", true)[0];
        assert!(resolved.is_resolved);
        assert_eq!(resolved.resolved_by.as_deref(), Some("u2"));
        // Unresolved comments only by default.
        assert!(service.list("r1", "f1", "amount", false).is_empty());

        service.set_resolved(&comment.comment_id, false, "u3").unwrap();
        assert_eq!(service.list("r1", "f1", "amount", false).len(), 1);
    }
}
