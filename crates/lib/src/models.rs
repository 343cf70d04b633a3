//! Payload models carried by gateway events and HTTP responses.
//!
//! Identifiers are 64-bit snowflakes and stay `i64` end to end; serde_json
//! never routes them through `f64`, so values above 2^53 are preserved.

use serde::{Deserialize, Serialize};

/// Snowflake identifier.
pub type Snowflake = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub flags: i64,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub system: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub owner_id: Snowflake,
    #[serde(default)]
    pub max_members: Option<i32>,
    #[serde(default)]
    pub permissions: Option<i64>,
    #[serde(default)]
    pub features: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: Snowflake,
    pub guild_id: Snowflake,
    #[serde(default)]
    pub nick: Option<String>,
    /// Server-formatted timestamp, passed through unparsed.
    #[serde(default)]
    pub joined_at: Option<String>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub author_id: Option<Snowflake>,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<String>,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub pinned: bool,
}

/// Initial state sent after identify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ready {
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<Guild>,
}

/// Response body of `/register` and `/login`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResult {
    pub user: User,
    pub token: String,
}
