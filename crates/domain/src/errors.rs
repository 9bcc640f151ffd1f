use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Entity not found: {entity} {id}")]
    NotFound { entity: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Permanent error: {0}")]
    Permanent(String),

    #[error("Invalid state transition: {entity} {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Whether a retry at the same phase can reasonably succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DomainError::Transient(_) | DomainError::Database(_))
    }

    /// Truncated, human-readable form for `status_message` columns and
    /// PR status comments. Error text may carry multi-byte characters
    /// (YAML snippets, CLI stderr), so the cut walks back to a char
    /// boundary.
    pub fn status_message(&self) -> String {
        let mut message = self.to_string();
        let mut end = message.len().min(1024);
        while end > 0 && !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
        message
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_the_cycle() {
        let err = DomainError::DependencyCycle(vec![
            "api".to_string(),
            "worker".to_string(),
            "api".to_string(),
        ]);
        assert_eq!(err.to_string(), "Dependency cycle: api -> worker -> api");
    }

    #[test]
    fn status_message_is_bounded() {
        let err = DomainError::Permanent("x".repeat(4096));
        assert_eq!(err.status_message().len(), 1024);
    }

    #[test]
    fn status_message_cuts_on_char_boundaries() {
        // "Permanent error: " is 17 bytes; pad so a 3-byte char straddles
        // the 1024-byte mark.
        let prefix = "x".repeat(1024 - 17 - 1);
        let err = DomainError::Permanent(format!("{prefix}日本語のエラー"));
        let message = err.status_message();
        assert!(message.len() <= 1024);
        assert!(message.is_char_boundary(message.len()));
        // Must not panic and must keep the readable prefix.
        assert!(message.contains("Permanent error"));
    }

    #[test]
    fn transient_is_retriable() {
        assert!(DomainError::Transient("broker reconnect".into()).is_retriable());
        assert!(!DomainError::Config("bad yaml".into()).is_retriable());
    }
}
