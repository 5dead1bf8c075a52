pub mod records;

use std::collections::HashMap;
use std::io::Write;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::{MigrateError, Result};
use records::{Channel, Post, Team, User, CURRENT_VERSION};

/// Fixed stage order required by the destination's bulk importer. A stream
/// may skip kinds but never revisit an earlier one. The direct_* kinds are
/// reserved ordinals with no constructors yet.
const KIND_ORDER: [&str; 7] = [
    "version",
    "team",
    "channel",
    "user",
    "post",
    "direct_channel",
    "direct_post",
];

static KIND_ORDINALS: Lazy<HashMap<&'static str, usize>> =
    Lazy::new(|| KIND_ORDER.iter().enumerate().map(|(i, k)| (*k, i)).collect());

#[derive(Debug, Clone)]
pub enum BulkImportEntry {
    Version(i64),
    Team(Team),
    Channel(Channel),
    User(User),
    Post(Post),
}

impl BulkImportEntry {
    pub fn current_version() -> Self {
        Self::Version(CURRENT_VERSION)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::Team(_) => "team",
            Self::Channel(_) => "channel",
            Self::User(_) => "user",
            Self::Post(_) => "post",
        }
    }

    fn container(&self) -> TypedContainer<'_> {
        let mut tc = TypedContainer {
            kind: self.kind(),
            version: None,
            team: None,
            channel: None,
            user: None,
            post: None,
        };
        match self {
            Self::Version(v) => tc.version = Some(*v),
            Self::Team(t) => tc.team = Some(t),
            Self::Channel(c) => tc.channel = Some(c),
            Self::User(u) => tc.user = Some(u),
            Self::Post(p) => tc.post = Some(p),
        }
        tc
    }
}

/// One line of the export stream: a `type` discriminator plus exactly one
/// populated payload field; the unused ones are omitted, not null.
#[derive(Serialize)]
struct TypedContainer<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    team: Option<&'a Team>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    post: Option<&'a Post>,
}

/// Serializes typed records as JSON Lines while enforcing the stage order:
/// once a record of ordinal i has been written, anything with a smaller
/// ordinal is rejected and nothing is emitted for it. Single-writer; callers
/// running concurrently must serialize access externally.
pub struct BulkImportWriter<W: Write> {
    last_index: usize,
    w: W,
}

impl<W: Write> BulkImportWriter<W> {
    pub fn new(w: W) -> Self {
        Self { last_index: 0, w }
    }

    pub fn append(&mut self, entry: &BulkImportEntry) -> Result<()> {
        let kind = entry.kind();
        let idx = KIND_ORDINALS[kind];
        if idx < self.last_index {
            return Err(MigrateError::RecordOrder {
                found: kind.to_string(),
                current: KIND_ORDER[self.last_index].to_string(),
            });
        }
        self.last_index = idx;

        // Serialize fully before touching the stream so a rejected or
        // malformed record never leaves a partial line behind.
        let line = serde_json::to_string(&entry.container())?;
        writeln!(self.w, "{}", line)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::records::*;

    fn team() -> BulkImportEntry {
        BulkImportEntry::Team(Team {
            name: "general".into(),
            display_name: "General".into(),
            team_type: TeamType::Open,
            description: String::new(),
            allow_open_invite: None,
        })
    }

    fn user(name: &str) -> BulkImportEntry {
        BulkImportEntry::User(User {
            username: name.into(),
            email: format!("{}@example.com", name),
            role: String::new(),
            teams: Vec::new(),
        })
    }

    fn post(message: &str) -> BulkImportEntry {
        BulkImportEntry::Post(Post {
            team: "general".into(),
            channel: "town-square".into(),
            user: "alice".into(),
            message: message.into(),
            create_at: 1_600_000_000_000,
            replies: Vec::new(),
            reactions: Vec::new(),
            attachments: Vec::new(),
        })
    }

    #[test]
    fn accepts_in_order_stream() -> anyhow::Result<()> {
        let mut w = BulkImportWriter::new(Vec::new());
        w.append(&BulkImportEntry::current_version())?;
        w.append(&team())?;
        w.append(&BulkImportEntry::Channel(Channel {
            team: "general".into(),
            name: "town-square".into(),
            display_name: "Town Square".into(),
            channel_type: ChannelType::Public,
            header: String::new(),
            purpose: String::new(),
        }))?;
        w.append(&user("alice"))?;
        w.append(&user("bob"))?;
        w.append(&post("hello"))?;

        let out = String::from_utf8(w.into_inner())?;
        assert_eq!(out.lines().count(), 6);
        assert!(out.starts_with(r#"{"type":"version","version":1}"#));
        Ok(())
    }

    #[test]
    fn skipping_kinds_is_legal() -> anyhow::Result<()> {
        // Monotonic, not contiguous: team straight to post is fine.
        let mut w = BulkImportWriter::new(Vec::new());
        w.append(&BulkImportEntry::current_version())?;
        w.append(&team())?;
        w.append(&post("no users at all"))?;
        Ok(())
    }

    #[test]
    fn rejects_earlier_kind_and_writes_nothing() -> anyhow::Result<()> {
        let mut w = BulkImportWriter::new(Vec::new());
        w.append(&BulkImportEntry::current_version())?;
        w.append(&post("first post"))?;

        let err = w.append(&user("late")).unwrap_err();
        match err {
            MigrateError::RecordOrder { found, current } => {
                assert_eq!(found, "user");
                assert_eq!(current, "post");
            }
            other => panic!("unexpected error: {}", other),
        }

        let out = String::from_utf8(w.into_inner())?;
        assert_eq!(out.lines().count(), 2);
        assert!(!out.contains("late"));
        Ok(())
    }

    #[test]
    fn same_kind_repeats_are_fine() -> anyhow::Result<()> {
        let mut w = BulkImportWriter::new(Vec::new());
        w.append(&user("a"))?;
        w.append(&user("b"))?;
        Ok(())
    }

    #[test]
    fn unused_payload_fields_are_omitted() -> anyhow::Result<()> {
        let mut w = BulkImportWriter::new(Vec::new());
        w.append(&team())?;
        let out = String::from_utf8(w.into_inner())?;
        assert!(!out.contains("\"user\""));
        assert!(!out.contains("null"));
        Ok(())
    }

    #[test]
    fn attachment_paths_serialize_in_posts() -> anyhow::Result<()> {
        let mut w = BulkImportWriter::new(Vec::new());
        let mut p = match post("with file") {
            BulkImportEntry::Post(p) => p,
            _ => unreachable!(),
        };
        p.attachments.push(Attachment {
            path: "attachments/abc123.jpg".into(),
        });
        w.append(&BulkImportEntry::Post(p))?;
        let out = String::from_utf8(w.into_inner())?;
        assert!(out.contains(r#""attachments":[{"path":"attachments/abc123.jpg"}]"#));
        Ok(())
    }
}
