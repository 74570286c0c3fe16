//! A single published version as seen by update clients.

use chrono::NaiveDate;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Banner images shown on the plugin details screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banners {
    pub low: String,
    pub high: String,
}

/// Icon images in two densities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Icons {
    #[serde(rename = "1x")]
    pub x1: String,
    #[serde(rename = "2x")]
    pub x2: String,
}

/// One entry of the manifest's `versions` array.
///
/// Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Canonical `major.minor.patch` string
    pub version: Version,

    /// Public URL of the archive
    pub download_url: String,

    /// Landing page of the plugin
    pub plugin_url: String,

    /// Release date (`YYYY-MM-DD`)
    pub last_updated: NaiveDate,

    /// HTML fragment, see [`render_changelog`]
    pub changelog: String,

    /// Minimum supported host version
    pub requires: String,

    /// Highest host version the release was tested against
    pub tested: String,

    /// Minimum runtime version
    pub requires_php: String,

    pub banners: Banners,

    pub icons: Icons,

    /// Keys this crate does not model (`sections`, `screenshots`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Render changelog items as `<h4>{version}</h4><ul><li>..</li></ul>`.
///
/// Items are trimmed and blank items dropped. Markup inside items is kept
/// verbatim so authors can use inline tags.
pub fn render_changelog<S: AsRef<str>>(version: &Version, items: &[S]) -> String {
    let list: String = items
        .iter()
        .map(|item| item.as_ref().trim())
        .filter(|item| !item.is_empty())
        .map(|item| format!("<li>{}</li>", item))
        .collect();
    format!("<h4>{}</h4><ul>{}</ul>", version, list)
}
