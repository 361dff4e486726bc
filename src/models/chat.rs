use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_size: Option<u64>,
}

impl Message {
    pub fn attachment(&self) -> Option<Attachment> {
        let url = self.attachment_url.clone()?;
        Some(Attachment {
            url,
            name: self.attachment_name.clone().unwrap_or_default(),
            size: self.attachment_size.unwrap_or(0),
        })
    }

    pub fn is_from(&self, viewer_id: &str) -> bool {
        self.sender_id == viewer_id
    }
}

/// A thread between one organization and one seeker, optionally annotated with a job.
///
/// `unread_count` is relative to the viewer the list was fetched for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub org_id: String,
    pub seeker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    pub last_message_at: DateTime<Utc>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    pub fn involves(&self, org_id: &str, seeker_id: &str) -> bool {
        self.org_id == org_id && self.seeker_id == seeker_id
    }
}

/// Summary fields merged into a conversation by `ConversationStore::upsert_summary`.
/// `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SummaryPatch {
    pub last_message: Option<Message>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: Option<u32>,
}

impl SummaryPatch {
    /// Patch for a message the viewer has seen: it becomes the preview and unread drops to 0.
    pub fn read_message(message: &Message) -> Self {
        Self {
            last_message: Some(message.clone()),
            last_message_at: Some(message.created_at),
            unread_count: Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerRole {
    Seeker,
    Org,
}

impl ViewerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewerRole::Seeker => "seeker",
            ViewerRole::Org => "org",
        }
    }
}

impl fmt::Display for ViewerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseViewerRoleError {
    message: String,
}

impl fmt::Display for ParseViewerRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseViewerRoleError {}

impl FromStr for ViewerRole {
    type Err = ParseViewerRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "seeker" => Ok(ViewerRole::Seeker),
            "org" | "organization" | "employer" => Ok(ViewerRole::Org),
            _ =>
                Err(ParseViewerRoleError {
                    message: format!("Invalid viewer role: '{}'", s),
                }),
        }
    }
}

/// The identity the engine acts as: every mark-as-read, send and delete is issued for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Viewer {
    pub id: String,
    pub role: ViewerRole,
}

impl Viewer {
    pub fn new(id: impl Into<String>, role: ViewerRole) -> Self {
        Self { id: id.into(), role }
    }
}
