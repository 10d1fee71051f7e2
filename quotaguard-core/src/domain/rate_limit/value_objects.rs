//! Rate limit bucket identity

use std::fmt;

use super::errors::RateLimitError;

/// Identity of one quota domain: a subject on a resource path.
///
/// Distinct subjects and distinct resources never share a counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    subject_id: String,
    resource_path: String,
}

impl RateLimitKey {
    pub fn new(
        subject_id: impl Into<String>,
        resource_path: impl Into<String>,
    ) -> Result<Self, RateLimitError> {
        let subject_id = subject_id.into();
        let resource_path = resource_path.into();

        if subject_id.trim().is_empty() {
            return Err(RateLimitError::EmptySubject);
        }
        if resource_path.trim().is_empty() {
            return Err(RateLimitError::EmptyResource);
        }

        Ok(Self {
            subject_id,
            resource_path,
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Convert to a Redis-compatible key string: `{prefix}:{subject}:{resource}`
    pub fn to_redis_key(&self, prefix: &str) -> String {
        format!(
            "{}{}",
            subject_key_prefix(prefix, &self.subject_id),
            self.resource_path
        )
    }

    pub fn belongs_to(&self, subject_id: &str, resource_path: Option<&str>) -> bool {
        self.subject_id == subject_id
            && resource_path.is_none_or(|resource| self.resource_path == resource)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.subject_id, self.resource_path)
    }
}

/// Literal prefix shared by every key of one subject, ending in `:`.
///
/// `%` and `:` in the subject are percent-encoded so one subject's prefix can
/// never be a prefix of another subject's keys.
pub fn subject_key_prefix(prefix: &str, subject_id: &str) -> String {
    let mut encoded = String::with_capacity(subject_id.len());
    for c in subject_id.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            ':' => encoded.push_str("%3A"),
            other => encoded.push(other),
        }
    }
    format!("{}:{}:", prefix, encoded)
}

/// Escape glob metacharacters for use in a `SCAN MATCH` pattern
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^' | '-') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_parts_rejected() {
        assert_eq!(
            RateLimitKey::new("", "/tasks"),
            Err(RateLimitError::EmptySubject)
        );
        assert_eq!(
            RateLimitKey::new("u1", "  "),
            Err(RateLimitError::EmptyResource)
        );
    }

    #[test]
    fn test_rate_limit_key_to_redis() {
        let key = RateLimitKey::new("u1", "/tasks").unwrap();
        assert_eq!(key.to_redis_key("ratelimit"), "ratelimit:u1:/tasks");
    }

    #[test]
    fn test_subject_separator_is_encoded() {
        let tricky = RateLimitKey::new("a:b", "/x").unwrap();
        assert_eq!(tricky.to_redis_key("rl"), "rl:a%3Ab:/x");

        // "a"'s keys must not share a prefix with "a:b"'s keys
        let prefix_a = subject_key_prefix("rl", "a");
        assert!(!tricky.to_redis_key("rl").starts_with(&prefix_a));
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("rl:u*1:"), "rl:u\\*1:");
        assert_eq!(escape_glob("a[b]?"), "a\\[b\\]\\?");
    }

    #[test]
    fn test_belongs_to() {
        let key = RateLimitKey::new("u1", "/tasks").unwrap();
        assert!(key.belongs_to("u1", None));
        assert!(key.belongs_to("u1", Some("/tasks")));
        assert!(!key.belongs_to("u1", Some("/boards")));
        assert!(!key.belongs_to("u2", None));
    }
}
