//! Tag resolution for metadata files
//!
//! Maps raw source tags to a genre string, a tag string and an age rating under the
//! configured [`TagPolicy`]. All lookups compare [`normalize`]d names, so "Slice of Life"
//! and "slice-of-life" are the same tag.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// Lowercase and strip everything that is not alphanumeric
pub fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A tag as reported by a source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    /// Display value
    pub value: String,
    /// Stable identifier, when the source has one
    #[serde(default)]
    pub identifier: Option<String>,
    /// The source marks this tag as a genre regardless of policy
    #[serde(default)]
    pub forced_genre: bool,
}

impl TagRecord {
    /// Tag without identifier
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            identifier: None,
            forced_genre: false,
        }
    }

    /// Tag with a stable identifier
    pub fn with_id(value: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            identifier: Some(identifier.into()),
            forced_genre: false,
        }
    }

    /// Tag the source flags as a genre
    pub fn genre(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            identifier: None,
            forced_genre: true,
        }
    }

    fn identifier(&self) -> &str {
        self.identifier.as_deref().unwrap_or(&self.value)
    }
}

/// Age ratings in increasing order of severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeRating {
    /// Unknown
    #[serde(rename = "Unknown")]
    Unknown,
    /// Rating Pending
    #[serde(rename = "Rating Pending")]
    RatingPending,
    /// Early Childhood
    #[serde(rename = "Early Childhood")]
    EarlyChildhood,
    /// Everyone
    #[serde(rename = "Everyone")]
    Everyone,
    /// G
    #[serde(rename = "G")]
    G,
    /// Everyone 10+
    #[serde(rename = "Everyone 10+")]
    Everyone10,
    /// PG
    #[serde(rename = "PG")]
    Pg,
    /// Kids to Adults
    #[serde(rename = "Kids to Adults")]
    KidsToAdults,
    /// Teen
    #[serde(rename = "Teen")]
    Teen,
    /// MA15+
    #[serde(rename = "MA15+")]
    Ma15,
    /// Mature 17+
    #[serde(rename = "Mature 17+")]
    Mature17,
    /// M
    #[serde(rename = "M")]
    M,
    /// R18+
    #[serde(rename = "R18+")]
    R18,
    /// Adults Only 18+
    #[serde(rename = "Adults Only 18+")]
    AdultsOnly18,
    /// X18+
    #[serde(rename = "X18+")]
    X18,
}

impl AgeRating {
    /// ComicInfo representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AgeRating::Unknown => "Unknown",
            AgeRating::RatingPending => "Rating Pending",
            AgeRating::EarlyChildhood => "Early Childhood",
            AgeRating::Everyone => "Everyone",
            AgeRating::G => "G",
            AgeRating::Everyone10 => "Everyone 10+",
            AgeRating::Pg => "PG",
            AgeRating::KidsToAdults => "Kids to Adults",
            AgeRating::Teen => "Teen",
            AgeRating::Ma15 => "MA15+",
            AgeRating::Mature17 => "Mature 17+",
            AgeRating::M => "M",
            AgeRating::R18 => "R18+",
            AgeRating::AdultsOnly18 => "Adults Only 18+",
            AgeRating::X18 => "X18+",
        }
    }
}

impl std::fmt::Display for AgeRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rewrites a tag name to its canonical form
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMapping {
    /// Name as seen at the source
    pub from: String,
    /// Canonical name
    pub to: String,
}

/// Tag policy owned by configuration, read-only to the resolver
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TagPolicy {
    /// Tags that never appear in any output
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Tags kept in the tag string
    #[serde(default)]
    pub whitelist: Vec<String>,
    /// Tags written as genres
    #[serde(default)]
    pub genres: Vec<String>,
    /// Tag name to age rating
    #[serde(default)]
    pub age_ratings: HashMap<String, AgeRating>,
    /// Synonyms applied before every other rule
    #[serde(default)]
    pub mappings: Vec<TagMapping>,
}

/// Policy with every name pre-normalized for lookups
#[derive(Debug, Default)]
struct CompiledPolicy {
    blacklist: Vec<String>,
    whitelist: Vec<String>,
    genres: Vec<String>,
    age_ratings: HashMap<String, AgeRating>,
    mappings: HashMap<String, String>,
}

impl CompiledPolicy {
    fn compile(policy: &TagPolicy) -> Self {
        let norm_all = |v: &[String]| v.iter().map(|s| normalize(s)).collect::<Vec<_>>();
        Self {
            blacklist: norm_all(&policy.blacklist),
            whitelist: norm_all(&policy.whitelist),
            genres: norm_all(&policy.genres),
            age_ratings: policy
                .age_ratings
                .iter()
                .map(|(tag, rating)| (normalize(tag), *rating))
                .collect(),
            mappings: policy
                .mappings
                .iter()
                .map(|m| (normalize(&m.from), m.to.clone()))
                .collect(),
        }
    }

    fn map(&self, value: &str) -> String {
        self.mappings
            .get(&normalize(value))
            .cloned()
            .unwrap_or_else(|| value.to_string())
    }
}

/// A tag after synonym mapping, with its normalized lookup keys
struct CanonicalTag {
    value: String,
    keys: [String; 2],
    forced_genre: bool,
}

impl CanonicalTag {
    fn in_list(&self, list: &[String]) -> bool {
        self.keys.iter().any(|k| list.contains(k))
    }
}

/// Genre and tag strings ready for a metadata file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedTags {
    /// Comma-joined genres
    pub genres: String,
    /// Comma-joined tags
    pub tags: String,
}

/// Resolves tags under one policy
///
/// A resolver without a policy (policy failed to load) resolves everything to empty
/// strings and no rating.
#[derive(Clone, Debug, Default)]
pub struct TagResolver {
    policy: Option<Arc<CompiledPolicy>>,
    include_unmatched: bool,
}

impl TagResolver {
    /// Create a resolver; `include_unmatched` keeps tags that are neither whitelisted nor genres
    pub fn new(policy: Option<&TagPolicy>, include_unmatched: bool) -> Self {
        Self {
            policy: policy.map(|p| Arc::new(CompiledPolicy::compile(p))),
            include_unmatched,
        }
    }

    /// Whether a policy is available
    pub fn has_policy(&self) -> bool {
        self.policy.is_some()
    }

    fn canonical(policy: &CompiledPolicy, tags: &[TagRecord]) -> Vec<CanonicalTag> {
        tags.iter()
            .map(|t| {
                let value = policy.map(&t.value);
                let identifier = policy.map(t.identifier());
                CanonicalTag {
                    keys: [normalize(&value), normalize(&identifier)],
                    value,
                    forced_genre: t.forced_genre,
                }
            })
            .collect()
    }

    /// Genre and tag strings for the given tags
    pub fn genres_and_tags(&self, tags: &[TagRecord]) -> ResolvedTags {
        let Some(policy) = self.policy.as_deref() else {
            return ResolvedTags::default();
        };

        let mut genres = Vec::new();
        let mut kept = Vec::new();
        // Normalized values already emitted, so synonyms and repeats appear once
        let mut emitted = HashSet::new();

        for tag in Self::canonical(policy, tags) {
            if tag.in_list(&policy.blacklist) || emitted.contains(&tag.keys[0]) {
                continue;
            }

            let is_genre = tag.in_list(&policy.genres);
            if is_genre || tag.forced_genre {
                emitted.insert(tag.keys[0].clone());
                genres.push(tag.value);
                continue;
            }

            if self.include_unmatched || tag.in_list(&policy.whitelist) {
                emitted.insert(tag.keys[0].clone());
                kept.push(tag.value);
            }
        }

        ResolvedTags {
            genres: genres.join(", "),
            tags: kept.join(", "),
        }
    }

    /// Most severe rating among the mapped tags, None when no tag is mapped
    pub fn age_rating(&self, tags: &[TagRecord]) -> Option<AgeRating> {
        let policy = self.policy.as_deref()?;
        Self::canonical(policy, tags)
            .iter()
            .filter_map(|t| t.keys.iter().find_map(|k| policy.age_ratings.get(k)))
            .copied()
            .max()
    }
}

/// Where the tag policy comes from
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Load the current policy
    async fn load(&self) -> Result<TagPolicy>;
}

/// Policy held in memory
#[derive(Clone, Debug, Default)]
pub struct StaticPolicySource(pub TagPolicy);

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn load(&self) -> Result<TagPolicy> {
        Ok(self.0.clone())
    }
}

/// Policy read from a JSON file on every load, so edits apply to the next session
#[derive(Clone, Debug)]
pub struct JsonPolicyFile {
    path: PathBuf,
}

impl JsonPolicyFile {
    /// Create a source reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicySource for JsonPolicyFile {
    async fn load(&self) -> Result<TagPolicy> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Config {
                message: format!("failed to read tag policy {}: {e}", self.path.display()),
                key: Some("policy_file".to_string()),
            }
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
