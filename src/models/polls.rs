use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollView {
    pub poll_id: i32,
    pub suggestion_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub stored_status: String,
    pub end_at: i64,
    pub notify_enabled: bool,
    pub created_by: i32,
    pub created_at: i64,
    pub closed_at: Option<i64>,
    pub nulled_at: Option<i64>,
    pub nulled_by: Option<i32>,
    pub result_notified_at: Option<i64>,
    pub tally: TallyView,
    pub active_members: i64,
    pub has_voted: Option<bool>,
    pub user_vote: Option<i32>, // 1=For, -1=Against
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyView {
    pub votes_for: i64,
    pub votes_against: i64,
    pub abstentions: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollListView {
    pub suggestion_id: i32,
    pub scope: Option<String>,
    pub polls: Vec<PollView>,
}

// Request/Response types for the polls HTTP API

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePollRequest {
    pub actor_id: i32,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Unix seconds.
    pub end_at: i64,
    #[serde(default = "default_notify")]
    pub notify_enabled: bool,
}

const fn default_notify() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub actor_id: i32,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub poll_id: i32,
    pub value: i32,
    pub changed: bool,
    pub tally: TallyView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRequest {
    pub actor_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResultResponse {
    pub poll_id: i32,
    /// `sent`, `skipped_no_scope` or `skipped_no_recipients`.
    pub outcome: String,
    pub recipients: usize,
}
