//! Who may download a file.

use crate::models::{file::FileRecord, subject::Subject};

/// Returns true when `subject` may view `record`.
///
/// Public files are visible to every authenticated subject; private files
/// only to their owner. No I/O, so it runs before the object store is
/// touched.
pub fn may_view(record: &FileRecord, subject: &Subject) -> bool {
    record.is_public || record.owner_id == subject.id
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    fn record(owner: &str, is_public: bool) -> FileRecord {
        FileRecord {
            object_id: "3b1f3f0e-7a52-4b8e-9f0f-1c2d3e4f5a6b".into(),
            owner_id: owner.into(),
            file_name: "notes.txt".into(),
            content_type: "text/plain".into(),
            is_public,
            size_bytes: 5,
            etag: "5d41402abc4b2a76b9719d911017c592".into(),
            created_at: Utc::now(),
        }
    }

    #[rstest]
    #[case("alice", true, "alice", true)]
    #[case("alice", false, "alice", true)]
    #[case("alice", true, "bob", true)]
    #[case("alice", false, "bob", false)]
    fn visibility_rules(
        #[case] owner: &str,
        #[case] is_public: bool,
        #[case] caller: &str,
        #[case] expected: bool,
    ) {
        let subject = Subject::new(caller, vec![]);
        assert_eq!(may_view(&record(owner, is_public), &subject), expected);
    }

    #[test]
    fn owner_match_is_exact() {
        let subject = Subject::new("Alice", vec![]);
        assert!(!may_view(&record("alice", false), &subject));
    }
}
