//! Discover feed parameters.

use serde::{Deserialize, Serialize};

/// Ordering of the discover feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedSort {
    /// Reverse-chronological, `created_at` cursor.
    #[default]
    #[serde(rename = "new")]
    New,
    /// Most liked in the last seven days, composite cursor.
    #[serde(rename = "top_7d")]
    Top7d,
}

impl FeedSort {
    /// Query-string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Top7d => "top_7d",
        }
    }
}

/// Filters accepted by the discover endpoint.
///
/// Each distinct combination is a separate cached feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverParams {
    /// Free-text search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Ordering.
    #[serde(default)]
    pub sort: FeedSort,
    /// Only posts with media.
    #[serde(default)]
    pub photos_only: bool,
    /// Only the viewer's posts.
    #[serde(default)]
    pub mine_only: bool,
    /// Category filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl DiscoverParams {
    /// Whether a freshly created post by the viewer belongs at the top of this
    /// feed without a server round trip.
    #[must_use]
    pub fn admits_new_own_post(&self, has_media: bool) -> bool {
        self.sort == FeedSort::New
            && self.query.is_none()
            && self.category.is_none()
            && (!self.photos_only || has_media)
    }

    /// Query pairs appended to the discover request.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("sort", self.sort.as_str().to_owned())];
        if let Some(query) = &self.query {
            pairs.push(("query", query.clone()));
        }
        if self.photos_only {
            pairs.push(("photosOnly", "true".to_owned()));
        }
        if self.mine_only {
            pairs.push(("mineOnly", "true".to_owned()));
        }
        if let Some(category) = &self.category {
            pairs.push(("category", category.clone()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unfiltered_chronological_feeds_admit_new_posts() {
        assert!(DiscoverParams::default().admits_new_own_post(false));
        let top = DiscoverParams {
            sort: FeedSort::Top7d,
            ..DiscoverParams::default()
        };
        assert!(!top.admits_new_own_post(true));
        let photos = DiscoverParams {
            photos_only: true,
            ..DiscoverParams::default()
        };
        assert!(!photos.admits_new_own_post(false));
        assert!(photos.admits_new_own_post(true));
    }

    #[test]
    fn query_pairs_use_wire_names() {
        let params = DiscoverParams {
            query: Some("autoflower".to_owned()),
            sort: FeedSort::Top7d,
            photos_only: true,
            mine_only: false,
            category: None,
        };
        assert_eq!(
            params.query_pairs(),
            vec![
                ("sort", "top_7d".to_owned()),
                ("query", "autoflower".to_owned()),
                ("photosOnly", "true".to_owned()),
            ]
        );
    }
}
