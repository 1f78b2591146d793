//! Entity records exchanged with the remote service and kept in the cache.
//!
//! Field names match the JSON the server speaks. Denormalized cache
//! columns (`course_id`, `user_id`) are read straight from these payloads,
//! so renaming those fields is a schema change.

use serde::{Deserialize, Serialize};

/// Builds the composite cache id of a progress record.
///
/// # Example
///
/// ```rust
/// assert_eq!(driftsync_protocol::progress_id("c1", "u1"), "c1:u1");
/// ```
pub fn progress_id(course_id: &str, user_id: &str) -> String {
    format!("{course_id}:{user_id}")
}

/// A user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Account identifier.
    pub user_id: String,
    /// Name shown to other users.
    #[serde(default)]
    pub display_name: String,
    /// Avatar image location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Free-form biography.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl Profile {
    /// Creates an empty profile for `user_id`.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: String::new(),
            avatar_url: None,
            bio: None,
        }
    }
}

/// A catalog course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Course identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Number of questions in the course.
    #[serde(default)]
    pub question_count: u32,
}

/// A catalog question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question identifier.
    pub id: String,
    /// Owning course.
    pub course_id: String,
    /// Question text.
    pub prompt: String,
    /// Answer choices, in display order.
    #[serde(default)]
    pub choices: Vec<String>,
}

/// A user's progress through one course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Course identifier.
    pub course_id: String,
    /// Account identifier.
    pub user_id: String,
    /// Completion percentage, 0 to 100.
    pub percent: u8,
    /// Whether the course is finished.
    #[serde(default)]
    pub completed: bool,
    /// Last change in Unix milliseconds.
    #[serde(default)]
    pub updated_at: i64,
}

impl Progress {
    /// Returns the composite cache id.
    pub fn id(&self) -> String {
        progress_id(&self.course_id, &self.user_id)
    }
}

/// A user's credit balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Account identifier.
    pub user_id: String,
    /// Current balance. May go negative locally after optimistic spends.
    pub balance: i64,
}

impl Wallet {
    /// Creates a wallet with a zero balance.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            balance: 0,
        }
    }
}

/// Response of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Server-reported status, `ok` when healthy.
    pub status: String,
}
