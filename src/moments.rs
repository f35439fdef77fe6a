//! Moments, the journal entries of a flow

use chrono::naive::NaiveDateTime;
use uuid::Uuid;

use crate::membership::Participant;
use crate::membership::Principal;

/// Maximum length of a derived snippet, in characters
const SNIPPET_MAX_LENGTH: usize = 160;

#[derive(Clone, Debug)]
pub struct Moment {
    pub id: Uuid,
    pub flow_id: Uuid,
    /// The author of the moment
    pub user_id: Uuid,
    pub title: String,
    /// Rich text (HTML) content
    pub content: String,
    /// Derived from the content on every save, see [`generate_snippet`]
    pub snippet: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Derive the plain-text snippet of a moment from its content
///
/// Deterministic: tags stripped, whitespace collapsed, truncated to a fixed
/// number of characters with an ellipsis.
pub fn generate_snippet(content: &str) -> String {
    let mut plain = String::with_capacity(content.len());
    let mut in_tag = false;
    let mut last_was_space = true;

    for ch in content.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if in_tag => {}
            ch if ch.is_whitespace() => {
                if !last_was_space {
                    plain.push(' ');
                    last_was_space = true;
                }
            }
            ch => {
                plain.push(ch);
                last_was_space = false;
            }
        }
    }

    let plain = plain.trim_end();

    let mut snippet = String::with_capacity(SNIPPET_MAX_LENGTH + 3);

    for (count, ch) in plain.chars().enumerate() {
        if count == SNIPPET_MAX_LENGTH {
            snippet.push_str("...");
            return snippet;
        }

        snippet.push(ch);
    }

    snippet
}

/// Count the moments of a flow that a member has not read yet
///
/// A moment counts as unread when it was updated after the member's last
/// recorded read, unless the member authored it. A member without a recorded
/// read time has read nothing.
pub fn count_unread(moments: &[Moment], member: &Participant) -> usize {
    let Principal::User(member_id) = &member.principal else {
        // email-only invitees have no account to read with
        return 0;
    };

    moments
        .iter()
        .filter(|moment| &moment.user_id != member_id)
        .filter(|moment| match member.last_read_at {
            Some(last_read_at) => moment.updated_at > last_read_at,
            None => true,
        })
        .count()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::membership::ParticipantRole;

    use super::*;

    #[test]
    fn test_generate_snippet_strips_tags() {
        // tags are replaced by nothing, not by a space
        let content = "<p>Dear diary, today was <strong>great</strong>.</p>";
        assert_eq!(
            "Dear diary, today was great.".to_string(),
            generate_snippet(content)
        );

        let content = "<p>Dear diary,</p><p>today was great.</p>";
        assert_eq!(
            "Dear diary,today was great.".to_string(),
            generate_snippet(content)
        );
    }

    #[test]
    fn test_generate_snippet_collapses_whitespace() {
        let content = "a\n\n  b\t c   ";
        assert_eq!("a b c".to_string(), generate_snippet(content));
    }

    #[test]
    fn test_generate_snippet_truncates() {
        let content = "x".repeat(200);
        let snippet = generate_snippet(&content);

        assert_eq!(163, snippet.chars().count());
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_generate_snippet_is_deterministic() {
        let content = "<h1>Title</h1> and some text";
        assert_eq!(generate_snippet(content), generate_snippet(content));
    }

    #[test]
    fn test_count_unread_excludes_own_moments() {
        let flow_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let reader = Uuid::new_v4();

        let t1 = timestamp(10);
        let t2 = timestamp(20);

        let moments = vec![moment(flow_id, author, t2)];

        // the reader last read at T1 < T2, one unread
        let member = participant(flow_id, reader, Some(t1));
        assert_eq!(1, count_unread(&moments, &member));

        // the author never has their own moments unread
        let member = participant(flow_id, author, Some(t1));
        assert_eq!(0, count_unread(&moments, &member));

        // reading after T2 clears the count
        let member = participant(flow_id, reader, Some(timestamp(30)));
        assert_eq!(0, count_unread(&moments, &member));
    }

    fn timestamp(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap()
    }

    fn moment(flow_id: Uuid, user_id: Uuid, updated_at: NaiveDateTime) -> Moment {
        Moment {
            id: Uuid::new_v4(),
            flow_id,
            user_id,
            title: "Untitled Moment".to_string(),
            content: String::new(),
            snippet: String::new(),
            created_at: updated_at,
            updated_at,
        }
    }

    fn participant(
        flow_id: Uuid,
        user_id: Uuid,
        last_read_at: Option<NaiveDateTime>,
    ) -> Participant {
        Participant {
            flow_id,
            principal: Principal::User(user_id),
            role: ParticipantRole::Member,
            last_read_at,
            created_at: timestamp(0),
        }
    }
}
