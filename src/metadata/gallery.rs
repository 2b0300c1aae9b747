use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::database::schema::{ExternalMetadata, ExternalTag};
use crate::metadata::MetadataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Unknown,
    Misc,
    Doujinshi,
    Manga,
    ArtistCg,
    GameCg,
    ImageSet,
    Cosplay,
    AsianPorn,
    NonH,
    Western,
    Private,
}

impl Category {
    const NAMES: [(Category, &'static str); 11] = [
        (Category::Misc, "Misc"),
        (Category::Doujinshi, "Doujinshi"),
        (Category::Manga, "Manga"),
        (Category::ArtistCg, "Artist CG"),
        (Category::GameCg, "Game CG"),
        (Category::ImageSet, "Image Set"),
        (Category::Cosplay, "Cosplay"),
        (Category::AsianPorn, "Asian Porn"),
        (Category::NonH, "Non-H"),
        (Category::Western, "Western"),
        (Category::Private, "Private"),
    ];

    pub fn as_str(&self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(c, _)| c == self)
            .map(|(_, name)| *name)
            .unwrap_or("__unknown__")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(c, _)| *c)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The gallery API reports several numbers as JSON strings.
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().ok_or_else(|| de::Error::custom("expected integer")),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected integer, got {}", other))),
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| de::Error::custom("expected number")),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected number, got {}", other))),
    }
}

/// One `gmetadata` entry of a gallery API `gdata` response.
#[derive(Debug, Clone, Deserialize)]
pub struct GalleryMetadata {
    #[serde(deserialize_with = "lenient_i64")]
    pub gid: i64,
    pub token: String,
    #[serde(default)]
    pub archiver_key: String,
    pub title: String,
    #[serde(default)]
    pub title_jpn: String,
    pub category: String,
    pub thumb: String,
    pub uploader: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub posted: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub filecount: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub filesize: i64,
    #[serde(default)]
    pub expunged: bool,
    #[serde(deserialize_with = "lenient_f64")]
    pub rating: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GdataResponse {
    #[serde(default)]
    gmetadata: Vec<Value>,
}

/// The fields every `gmetadata` entry carries, error replies included.
#[derive(Debug, Deserialize)]
struct EntryHeader {
    #[serde(deserialize_with = "lenient_i64")]
    gid: i64,
    #[serde(default)]
    error: Option<String>,
}

impl GalleryMetadata {
    /// Extracts and validates the record for `gid` from a `gdata` response body.
    pub fn from_gdata_response(body: &str, gid: i64) -> Result<Self, MetadataError> {
        let response: GdataResponse = serde_json::from_str(body)?;
        let entry = response
            .gmetadata
            .into_iter()
            .next()
            .ok_or_else(|| MetadataError::Invalid("response has no gmetadata entry".into()))?;

        let header = EntryHeader::deserialize(&entry)?;
        if header.gid != gid {
            return Err(MetadataError::GidMismatch { expected: gid, found: header.gid });
        }
        if let Some(error) = header.error {
            return Err(MetadataError::Api(error));
        }

        let meta = GalleryMetadata::deserialize(entry)?;
        meta.validate()?;
        Ok(meta)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        let mut problems = Vec::new();
        if self.gid <= 0 {
            problems.push("gid");
        }
        if self.token.is_empty() {
            problems.push("token");
        }
        if self.title.is_empty() {
            problems.push("title");
        }
        if Category::from_name(&self.category).is_none() {
            problems.push("category");
        }
        if self.thumb.is_empty() {
            problems.push("thumb");
        }
        if self.uploader.is_empty() {
            problems.push("uploader");
        }
        if self.posted <= 0 {
            problems.push("posted");
        }
        if self.filecount <= 0 {
            problems.push("filecount");
        }
        if self.filesize <= 0 {
            problems.push("filesize");
        }
        if self.rating < 0.0 {
            problems.push("rating");
        }
        if self.tags.iter().any(|t| t.is_empty()) {
            problems.push("tags");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MetadataError::Invalid(format!("invalid fields: {}", problems.join(", "))))
        }
    }

    /// Splits into the stored record and its tag rows.
    pub fn into_records(self, fetched_at: i64) -> (ExternalMetadata, Vec<ExternalTag>) {
        let gid = self.gid.to_string();
        let tags = self
            .tags
            .into_iter()
            .map(|tag| ExternalTag { gid: gid.clone(), tag })
            .collect();
        let record = ExternalMetadata {
            gid,
            token: self.token,
            title: self.title,
            title_jpn: self.title_jpn,
            category: Category::from_name(&self.category).unwrap_or(Category::Unknown),
            thumb: self.thumb,
            uploader: self.uploader,
            posted: self.posted,
            filecount: self.filecount,
            filesize: self.filesize,
            expunged: self.expunged,
            rating: self.rating,
            meta_updated: fetched_at,
        };
        (record, tags)
    }
}
