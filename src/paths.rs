//! Typed asset URLs.
//!
//! Every file an animation owns is addressed as
//! `<prefix>/animations/<id>/<relative>` while it lives in the working area,
//! or `<prefix>/animations/<id>/versions/<vid>/<relative>` once a version owns
//! a copy. [`AssetUrl`] parses both forms so moving a URL between scopes is a
//! structural change rather than string surgery. URLs that do not belong to
//! the animation are never rewritten.

use std::fmt;

const ANIMATIONS: &str = "animations";
const VERSIONS: &str = "versions";

/// Which copy of an animation's files a URL points into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetScope {
    Working,
    Version(String),
}

/// A URL inside one animation's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetUrl {
    pub prefix: String,
    pub animation_id: String,
    pub scope: AssetScope,
    /// Path below the scope root, never empty
    pub relative: String,
}

impl AssetUrl {
    pub fn working(prefix: &str, animation_id: &str, relative: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            animation_id: animation_id.to_string(),
            scope: AssetScope::Working,
            relative: relative.trim_start_matches('/').to_string(),
        }
    }

    /// Parse `url` as belonging to `animation_id` under `prefix`.
    ///
    /// Returns `None` for URLs outside that namespace.
    pub fn parse(prefix: &str, animation_id: &str, url: &str) -> Option<Self> {
        let base = format!("{}/{}/{}/", prefix.trim_end_matches('/'), ANIMATIONS, animation_id);
        let rest = url.strip_prefix(&base)?;
        if rest.is_empty() {
            return None;
        }

        let scope_and_relative = rest
            .strip_prefix(VERSIONS)
            .and_then(|r| r.strip_prefix('/'))
            .and_then(|r| r.split_once('/'))
            .filter(|(vid, relative)| !vid.is_empty() && !relative.is_empty());

        let (scope, relative) = match scope_and_relative {
            Some((vid, relative)) => (AssetScope::Version(vid.to_string()), relative),
            None => (AssetScope::Working, rest),
        };

        Some(Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            animation_id: animation_id.to_string(),
            scope,
            relative: relative.to_string(),
        })
    }

    pub fn in_scope(mut self, scope: AssetScope) -> Self {
        self.scope = scope;
        self
    }
}

impl fmt::Display for AssetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/", self.prefix, ANIMATIONS, self.animation_id)?;
        if let AssetScope::Version(vid) = &self.scope {
            write!(f, "{}/{}/", VERSIONS, vid)?;
        }
        f.write_str(&self.relative)
    }
}

/// Rewrites URLs between the working namespace and one version's namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRemap<'a> {
    pub prefix: &'a str,
    pub animation_id: &'a str,
    pub version_id: &'a str,
}

impl<'a> UrlRemap<'a> {
    pub fn new(prefix: &'a str, animation_id: &'a str, version_id: &'a str) -> Self {
        Self { prefix, animation_id, version_id }
    }

    /// Move a working URL into the version. Anything else is returned as is.
    pub fn to_version(&self, url: &str) -> String {
        match AssetUrl::parse(self.prefix, self.animation_id, url) {
            Some(asset) if asset.scope == AssetScope::Working => {
                asset.in_scope(AssetScope::Version(self.version_id.to_string())).to_string()
            }
            _ => url.to_string(),
        }
    }

    /// Move a URL owned by this version back into the working area.
    /// Anything else is returned as is.
    pub fn to_working(&self, url: &str) -> String {
        match AssetUrl::parse(self.prefix, self.animation_id, url) {
            Some(asset) if asset.scope == AssetScope::Version(self.version_id.to_string()) => {
                asset.in_scope(AssetScope::Working).to_string()
            }
            _ => url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/api/storage";

    fn remap() -> UrlRemap<'static> {
        UrlRemap::new(PREFIX, "anim-1", "v-9")
    }

    #[test]
    fn test_parse_working_and_version() {
        let working = AssetUrl::parse(PREFIX, "anim-1", "/api/storage/animations/anim-1/generated/frames/frame_000.png").unwrap();
        assert_eq!(working.scope, AssetScope::Working);
        assert_eq!(working.relative, "generated/frames/frame_000.png");

        let version = AssetUrl::parse(PREFIX, "anim-1", "/api/storage/animations/anim-1/versions/v-9/generated/a.png").unwrap();
        assert_eq!(version.scope, AssetScope::Version("v-9".into()));
        assert_eq!(version.relative, "generated/a.png");
    }

    #[test]
    fn test_parse_rejects_foreign() {
        assert!(AssetUrl::parse(PREFIX, "anim-1", "/api/storage/animations/anim-2/x.png").is_none());
        assert!(AssetUrl::parse(PREFIX, "anim-1", "https://cdn.example.com/x.png").is_none());
        assert!(AssetUrl::parse(PREFIX, "anim-1", "/api/storage/animations/anim-1/").is_none());
    }

    #[test]
    fn test_display_round_trips() {
        for url in [
            "/api/storage/animations/anim-1/generated/spritesheet.png",
            "/api/storage/animations/anim-1/versions/v-9/keyframes/k.png",
        ] {
            assert_eq!(AssetUrl::parse(PREFIX, "anim-1", url).unwrap().to_string(), url);
        }
    }

    #[test]
    fn test_to_version() {
        assert_eq!(
            remap().to_version("/api/storage/animations/anim-1/generated/frames/frame_001.png"),
            "/api/storage/animations/anim-1/versions/v-9/generated/frames/frame_001.png"
        );
    }

    #[test]
    fn test_working_round_trip() {
        let urls = [
            "/api/storage/animations/anim-1/generated/frames/frame_001.png",
            "/api/storage/animations/anim-1/keyframes/frame_003.png",
            "/api/storage/animations/anim-1/generated/spritesheet_1700000000_rebuild.png",
            "/api/storage/animations/anim-2/generated/x.png",
            "https://cdn.example.com/video.mp4",
            "",
        ];
        let remap = remap();
        for url in urls {
            assert_eq!(remap.to_working(&remap.to_version(url)), url);
        }
    }

    #[test]
    fn test_version_round_trip() {
        let remap = remap();
        let url = "/api/storage/animations/anim-1/versions/v-9/generated/frames/frame_000.png";
        assert_eq!(remap.to_version(&remap.to_working(url)), url);
    }

    #[test]
    fn test_other_version_urls_untouched() {
        let remap = remap();
        let other = "/api/storage/animations/anim-1/versions/v-2/generated/a.png";
        assert_eq!(remap.to_version(other), other);
        assert_eq!(remap.to_working(other), other);
    }
}
