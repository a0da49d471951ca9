//! Credentials presented to workflow operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity a caller presents. Two users are the same principal when
/// their ids match, regardless of validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub valid_until: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            valid_until: None,
        }
    }

    pub fn with_expiry(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && self.valid_until.map_or(true, |until| until > Utc::now())
    }

    pub fn same(&self, other: &User) -> bool {
        self.id == other.id
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for User {}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validity() {
        assert!(User::new("alice").is_valid());
        assert!(!User::new("").is_valid());
        let expired = User::new("bob").with_expiry(Utc::now() - Duration::seconds(5));
        assert!(!expired.is_valid());
        assert_eq!(expired, User::new("bob"));
    }
}
