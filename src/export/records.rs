//! Typed records for the destination's bulk-import stream. These are built
//! by the conversion layer and serialized once, one JSON object per line.

use serde::Serialize;

/// Bulk import format version understood by the destination.
pub const CURRENT_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TeamType {
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "I")]
    InviteOnly,
}

#[derive(Debug, Clone, Serialize)]
pub struct Team {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub team_type: TeamType,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_open_invite: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelType {
    #[serde(rename = "O")]
    Public,
    #[serde(rename = "P")]
    Private,
}

#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub team: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub header: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub purpose: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<UserTeamMembership>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserTeamMembership {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub roles: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<UserChannelMembership>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserChannelMembership {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub roles: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub team: String,
    pub channel: String,
    pub user: String,
    pub message: String,
    /// Milliseconds from epoch.
    pub create_at: i64,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Reply>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub user: String,
    pub message: String,
    pub create_at: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reaction {
    pub user: String,
    pub emoji_name: String,
    pub create_at: i64,
}

/// A stored attachment referenced by path, as handed back by the store.
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    pub path: String,
}

pub const MAX_ATTACHMENTS_PER_POST: usize = 5;
