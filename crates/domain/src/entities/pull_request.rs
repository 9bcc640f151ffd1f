use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::status::PullRequestStatus;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PullRequest {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub pr_number: i32,
    pub title: String,
    #[sqlx(try_from = "String")]
    pub status: PullRequestStatus,
    pub branch_name: String,
    pub full_name: String,
    pub latest_commit: Option<String>,
    pub github_login: Option<String>,
    pub comment_id: Option<i64>,
    pub status_comment_id: Option<i64>,
    pub etag: Option<String>,
    pub labels: Json<Vec<String>>,
    pub deploy_on_update: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct PullRequestPatch {
    pub title: Option<String>,
    pub status: Option<PullRequestStatus>,
    pub branch_name: Option<String>,
    pub latest_commit: Option<String>,
    pub github_login: Option<String>,
    pub comment_id: Option<i64>,
    pub status_comment_id: Option<i64>,
    pub etag: Option<String>,
    pub labels: Option<Vec<String>>,
    pub deploy_on_update: Option<bool>,
}
