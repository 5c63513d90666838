//! Time-to-live policy per category of upstream data.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DAY: u64 = 24 * 60 * 60;

/// What kind of upstream data a response carries, which decides how long it may
/// be served from cache.
///
/// TTLs grow with how rarely the upstream data changes: a user's recent
/// scrobbles move every few seconds while archived cover art is effectively fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    /// Recent/now-playing tracks for a user.
    UserTracks,
    /// Track metadata from the scrobble service.
    TrackInfo,
    /// Release searches and release details from MusicBrainz.
    Musicbrainz,
    /// Cover Art Archive image listings.
    CoverArt,
}

impl CacheCategory {
    /// Every category, shortest TTL first.
    pub const ALL: [CacheCategory; 4] = [
        CacheCategory::UserTracks,
        CacheCategory::TrackInfo,
        CacheCategory::Musicbrainz,
        CacheCategory::CoverArt,
    ];

    /// Time-to-live in whole seconds.
    pub const fn ttl_secs(self) -> u64 {
        match self {
            CacheCategory::UserTracks => 10,
            CacheCategory::TrackInfo => DAY,
            CacheCategory::Musicbrainz => 7 * DAY,
            CacheCategory::CoverArt => 30 * DAY,
        }
    }

    pub const fn ttl(self) -> Duration {
        Duration::from_secs(self.ttl_secs())
    }

    /// The `Cache-Control` value stamped on entries of this category.
    pub fn cache_control(self) -> String {
        format!("public, max-age={}", self.ttl_secs())
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CacheCategory::UserTracks => "USER_TRACKS",
            CacheCategory::TrackInfo => "TRACK_INFO",
            CacheCategory::Musicbrainz => "MUSICBRAINZ",
            CacheCategory::CoverArt => "COVER_ART",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown cache category: {0}")]
pub struct UnknownCategory(String);

impl FromStr for CacheCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCategory(s.to_owned()))
    }
}
