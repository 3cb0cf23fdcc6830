use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direct (two-member) or group conversation. The chat ID doubles as the
/// room identifier used for routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub is_group: bool,
    /// Ordered, distinct member IDs
    pub members: Vec<Uuid>,
    pub name: Option<String>,
    pub last_message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    /// First member that is not `user_id`. Only meaningful for direct chats.
    pub fn other_member(&self, user_id: Uuid) -> Option<Uuid> {
        self.members.iter().copied().find(|m| *m != user_id)
    }

    /// Every member except the sender
    pub fn recipients(&self, sender_id: Uuid) -> Vec<Uuid> {
        self.members
            .iter()
            .copied()
            .filter(|m| *m != sender_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(members: Vec<Uuid>, is_group: bool) -> Chat {
        Chat {
            id: Uuid::new_v4(),
            is_group,
            members,
            name: None,
            last_message_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_other_member_in_direct_chat() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let direct = chat(vec![a, b], false);

        assert_eq!(direct.other_member(a), Some(b));
        assert_eq!(direct.other_member(b), Some(a));
    }

    #[test]
    fn test_other_member_missing() {
        let a = Uuid::new_v4();
        let lonely = chat(vec![a], false);
        assert_eq!(lonely.other_member(a), None);
    }

    #[test]
    fn test_recipients_exclude_sender() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let group = chat(vec![a, b, c], true);

        assert_eq!(group.recipients(b), vec![a, c]);
        assert!(group.has_member(c));
        assert!(!group.has_member(Uuid::new_v4()));
    }
}
