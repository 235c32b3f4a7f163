use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{AppError, AppResult};

/// Approval state tracked per shortcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Pending,
    Approved,
    Rejected,
    Uploaded,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Approved => "approved",
            PostStatus::Rejected => "rejected",
            PostStatus::Uploaded => "uploaded",
            PostStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(PostStatus::Pending),
            "approved" => Ok(PostStatus::Approved),
            "rejected" => Ok(PostStatus::Rejected),
            "uploaded" => Ok(PostStatus::Uploaded),
            "failed" => Ok(PostStatus::Failed),
            other => Err(AppError::validation(
                "status",
                &format!(
                    "Unknown status '{}'. Expected pending, approved, rejected, uploaded or failed",
                    other
                ),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    #[default]
    Community,
    Club,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::Community => "community",
            DestinationKind::Club => "club",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim() {
            "community" => Ok(DestinationKind::Community),
            "club" => Ok(DestinationKind::Club),
            other => Err(AppError::validation(
                "destinationKind",
                &format!("Unknown destination kind '{}'", other),
            )),
        }
    }
}

/// A feed content can be attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub kind: DestinationKind,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Image,
    Video,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Image => "image",
            ContentType::Video => "video",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContentType::Image => "jpg",
            ContentType::Video => "mp4",
        }
    }

    /// Manual share ceiling in megabytes
    pub fn size_limit_mb(&self) -> u64 {
        match self {
            ContentType::Image => 10,
            ContentType::Video => 50,
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ContentType::Image => "images",
            ContentType::Video => "videos",
        }
    }
}

/// One entry of a `<username>_posts.json` result file.
///
/// Only the fields the pipeline needs are typed; everything else the scraper
/// writes is carried in `extra` and echoed back when listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPost {
    pub shortcode: String,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub display_url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ScrapedPost {
    pub fn content_type(&self) -> ContentType {
        if self.is_video {
            ContentType::Video
        } else {
            ContentType::Image
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        let url = if self.is_video {
            self.video_url.as_deref()
        } else {
            self.display_url.as_deref()
        };
        url.filter(|u| !u.trim().is_empty())
    }

    pub fn caption_text(&self) -> &str {
        self.caption.as_deref().unwrap_or("")
    }
}

/// Scraped post merged with its locally tracked status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedPost {
    #[serde(flatten)]
    pub post: ScrapedPost,
    pub status: PostStatus,
    #[serde(rename = "sharedTo")]
    pub shared_to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub shortcode: String,
    pub status: PostStatus,
    #[serde(rename = "sharedTo")]
    pub shared_to: Vec<String>,
}

fn default_scrape_limit() -> u32 {
    10
}

/// Named configuration binding source usernames, scrape limit and destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub destination_kind: DestinationKind,
    #[serde(default, alias = "communityId")]
    pub destination_id: String,
    #[serde(default)]
    pub instagram_usernames: Vec<String>,
    #[serde(default = "default_scrape_limit")]
    pub scrape_limit: u32,
}

impl Profile {
    pub fn default_profile() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default Profile".to_string(),
            destination_kind: DestinationKind::Community,
            destination_id: String::new(),
            instagram_usernames: vec!["strangerthingstv".to_string()],
            scrape_limit: default_scrape_limit(),
        }
    }

    /// Bound destination, if one has been configured
    pub fn destination(&self) -> Option<Destination> {
        let id = self.destination_id.trim();
        if id.is_empty() {
            None
        } else {
            Some(Destination {
                kind: self.destination_kind,
                id: id.to_string(),
            })
        }
    }
}

/// Entry of the community reference list shown to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: DestinationKind,
}
