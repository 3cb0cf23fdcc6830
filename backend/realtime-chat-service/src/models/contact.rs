//! Directed contact relationship between two users
//!
//! One row exists per ordered (user_id, contact_id) pair. Two users are
//! mutual contacts only when both directed rows are `accepted`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Accepted,
    Blocked,
}

impl ContactStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: Uuid,
    pub contact_id: Uuid,
    pub status: ContactStatus,
}

impl Contact {
    pub fn new(user_id: Uuid, contact_id: Uuid, status: ContactStatus) -> Self {
        Self {
            user_id,
            contact_id,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_db() {
        assert_eq!(ContactStatus::from_db("pending"), Some(ContactStatus::Pending));
        assert_eq!(
            ContactStatus::from_db("accepted"),
            Some(ContactStatus::Accepted)
        );
        assert_eq!(ContactStatus::from_db("blocked"), Some(ContactStatus::Blocked));
        assert_eq!(ContactStatus::from_db("friends"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ContactStatus::Accepted).unwrap();
        assert_eq!(json, "\"accepted\"");
    }
}
