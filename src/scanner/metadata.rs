use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::path::Path;

/// Tags extracted from audio file metadata.
#[derive(Debug, Default)]
pub struct TagInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: Option<f64>,
    /// BPM tag written by DJ software (TBPM, BPM, tmpo)
    pub bpm: Option<f64>,
    /// Initial key tag (TKEY, INITIALKEY)
    pub key: Option<String>,
}

/// Read tags from an audio file. Returns empty tags on failure.
pub fn read_tags(path: &Path) -> TagInfo {
    let tagged_file = match lofty::read_from_path(path) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("Could not read tags from {}: {}", path.display(), e);
            return TagInfo::default();
        }
    };

    let duration_secs = {
        let secs = tagged_file.properties().duration().as_secs_f64();
        if secs > 0.0 { Some(secs) } else { None }
    };

    // Try primary tag, then fall back
    let Some(tag) = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
    else {
        return TagInfo {
            duration_secs,
            ..TagInfo::default()
        };
    };

    TagInfo {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        duration_secs,
        bpm: tag
            .get_string(&ItemKey::Bpm)
            .or_else(|| tag.get_string(&ItemKey::IntegerBpm))
            .and_then(parse_bpm),
        key: tag
            .get_string(&ItemKey::InitialKey)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    }
}

/// Parse a BPM tag value. Some taggers write "128.00", others "128 BPM".
pub fn parse_bpm(raw: &str) -> Option<f64> {
    let numeric = raw
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_alphabetic() || c.is_whitespace())
        .replace(',', ".");
    numeric
        .parse::<f64>()
        .ok()
        .filter(|b| b.is_finite() && *b > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bpm() {
        assert_eq!(parse_bpm("128"), Some(128.0));
        assert_eq!(parse_bpm(" 174.00 "), Some(174.0));
        assert_eq!(parse_bpm("126 BPM"), Some(126.0));
        assert_eq!(parse_bpm("99,5"), Some(99.5));
        assert_eq!(parse_bpm("0"), None);
        assert_eq!(parse_bpm("fast"), None);
        assert_eq!(parse_bpm(""), None);
    }

    #[test]
    fn test_unreadable_file_gives_empty_tags() {
        let tags = read_tags(Path::new("/nonexistent/cuewheel/track.mp3"));
        assert!(tags.title.is_none());
        assert!(tags.bpm.is_none());
        assert!(tags.duration_secs.is_none());
    }
}
