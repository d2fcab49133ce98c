use std::fmt;

use serde::{Deserialize, Serialize};

// -- Messages --

/// Message type accepted by the current schema revision. Before walls
/// existed the set was general, suggestion, question and feedback; rows
/// written then are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Visitor message
    #[default]
    General,
    /// Shown to everyone on the wall
    Common,
    /// Only visible to the addressed recipient
    Private,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [Self::General, Self::Common, Self::Private];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Common => "common",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Walls --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WallStyle {
    #[default]
    Standard,
    Cork,
    Blackboard,
    Colorful,
}

impl WallStyle {
    pub const ALL: [WallStyle; 4] = [Self::Standard, Self::Cork, Self::Blackboard, Self::Colorful];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Cork => "cork",
            Self::Blackboard => "blackboard",
            Self::Colorful => "colorful",
        }
    }
}

impl fmt::Display for WallStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Users --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Wechat,
    Normal,
}

impl AccountType {
    pub const ALL: [AccountType; 2] = [Self::Wechat, Self::Normal];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wechat => "wechat",
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
