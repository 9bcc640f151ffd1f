//! Composable filters for the build listing endpoints.

use chrono::{DateTime, Utc};
use domain::status::{BuildStatus, PullRequestStatus};

#[derive(Debug, Clone, Default)]
pub struct BuildFilter {
    pub statuses: Vec<BuildStatus>,
    pub repository_full_name: Option<String>,
    pub branch_name: Option<String>,
    pub pr_status: Option<PullRequestStatus>,
    /// Free-text LIKE over build uuid, branch name, and PR title.
    pub search: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination { page: 1, limit: 50 }
    }
}

impl Pagination {
    pub fn clamped(page: Option<u32>, limit: Option<u32>) -> Self {
        Pagination {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(50).clamp(1, 100),
        }
    }

    pub fn offset(&self) -> i64 {
        ((self.page - 1) * self.limit) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Status,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "b.created_at",
            SortField::UpdatedAt => "b.updated_at",
            SortField::Status => "b.status",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "createdAt" => Some(SortField::CreatedAt),
            "updatedAt" => Some(SortField::UpdatedAt),
            "status" => Some(SortField::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for Sort {
    fn default() -> Self {
        Sort {
            field: SortField::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_to_bounds() {
        let p = Pagination::clamped(Some(0), Some(500));
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, 100);
        assert_eq!(p.offset(), 0);

        let p = Pagination::clamped(Some(3), Some(25));
        assert_eq!(p.offset(), 50);
    }

    #[test]
    fn sort_fields_are_a_whitelist() {
        assert_eq!(SortField::parse("createdAt"), Some(SortField::CreatedAt));
        assert_eq!(SortField::parse("created_at"), None);
        assert_eq!(SortField::parse("; DROP TABLE builds"), None);
        assert_eq!(SortDirection::parse("desc"), Some(SortDirection::Desc));
    }
}
