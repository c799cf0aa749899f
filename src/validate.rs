//! Input validators and search-query normalization.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::model::{Equalizer, Filters, Timescale};
use crate::{Error, Result};

/// Maximum accepted search-query length, in characters.
pub const MAX_QUERY_LENGTH: usize = 500;

/// Snowflake ids are 17-20 digit decimal strings.
static SNOWFLAKE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{17,20}$").expect("snowflake pattern compiles")
});

/// Queries carrying an explicit source, e.g. `ytsearch:` or `scsearch:`.
static SEARCH_PREFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]{1,16}search:").expect("search prefix pattern compiles")
});

/// Whether `id` is a 17-20 digit snowflake.
pub fn is_snowflake(id: &str) -> bool {
    SNOWFLAKE_REGEX.is_match(id)
}

/// Check a player volume, which must lie in `0..=1000`.
pub fn volume(volume: u16) -> Result<u16> {
    if volume > 1000 {
        return Err(Error::InvalidVolume(volume));
    }

    Ok(volume)
}

/// Check a track position in milliseconds, which must be a non-negative
/// integer.
pub fn position(position: i64) -> Result<u64> {
    u64::try_from(position).map_err(|_| Error::InvalidPosition)
}

/// Whether `input` parses as an absolute URL.
pub fn is_url(input: &str) -> bool {
    Url::parse(input).is_ok()
}

/// Check an equalizer band list: bands `0..=14`, gains `-0.25..=1.0`.
pub fn equalizer(bands: &[Equalizer]) -> Result<()> {
    for band in bands {
        if band.band > 14 {
            return Err(Error::InvalidFilter("equalizer band must be 0..=14"));
        }

        if !(-0.25..=1.0).contains(&band.gain) {
            return Err(Error::InvalidFilter("equalizer gain must be -0.25..=1.0"));
        }
    }

    Ok(())
}

/// Check timescale components, each of which must lie in `(0, 10]`.
pub fn timescale(timescale: &Timescale) -> Result<()> {
    for value in [timescale.speed, timescale.pitch, timescale.rate]
        .into_iter()
        .flatten()
    {
        if value <= 0.0 || value > 10.0 {
            return Err(Error::InvalidFilter("timescale values must be in (0, 10]"));
        }
    }

    Ok(())
}

/// Check a whole filter record before it is applied: filter volume in
/// `0.0..=5.0`, equalizer bands and gains in range, timescale components in
/// `(0, 10]`.
pub fn filters(filters: &Filters) -> Result<()> {
    if let Some(volume) = filters.volume {
        if !(0.0..=5.0).contains(&volume) {
            return Err(Error::InvalidFilter("filter volume must be 0.0..=5.0"));
        }
    }

    if let Some(bands) = &filters.equalizer {
        equalizer(bands)?;
    }

    if let Some(ts) = &filters.timescale {
        timescale(ts)?;
    }

    Ok(())
}

/// Normalize a search query: trim, truncate to [`MAX_QUERY_LENGTH`] characters
/// and, when the query is neither a URL nor already source-prefixed, prepend
/// the search source (`ytsearch` unless overridden).
pub fn search_query(query: &str, default_source: Option<&str>) -> String {
    let trimmed: String = query.trim().chars().take(MAX_QUERY_LENGTH).collect();

    if trimmed.is_empty() || is_url(&trimmed) || SEARCH_PREFIX_REGEX.is_match(&trimmed) {
        return trimmed;
    }

    format!("{}:{}", default_source.unwrap_or("ytsearch"), trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_are_17_to_20_digits() {
        assert!(is_snowflake("12345678901234567"));
        assert!(is_snowflake("12345678901234567890"));
        assert!(!is_snowflake("1234567890123456"));
        assert!(!is_snowflake("123456789012345678901"));
        assert!(!is_snowflake("123456789012345678a"));
        assert!(!is_snowflake(""));
    }

    #[test]
    fn volume_bounds() {
        assert!(volume(0).is_ok());
        assert!(volume(1000).is_ok());
        assert!(matches!(volume(1001), Err(Error::InvalidVolume(1001))));
    }

    #[test]
    fn position_rejects_negatives() {
        assert_eq!(position(0).ok(), Some(0));
        assert_eq!(position(60_000).ok(), Some(60_000));
        assert!(matches!(position(-1), Err(Error::InvalidPosition)));
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_url("never gonna give you up"));
    }

    #[test]
    fn equalizer_bounds() {
        assert!(equalizer(&[Equalizer { band: 0, gain: 1.0 }]).is_ok());
        assert!(equalizer(&[Equalizer { band: 14, gain: -0.25 }]).is_ok());
        assert!(equalizer(&[Equalizer { band: 15, gain: 0.0 }]).is_err());
        assert!(equalizer(&[Equalizer { band: 0, gain: 1.1 }]).is_err());
    }

    #[test]
    fn timescale_bounds() {
        let ok = Timescale {
            speed: Some(1.2),
            pitch: Some(10.0),
            rate: None,
        };
        assert!(timescale(&ok).is_ok());

        let zero = Timescale {
            speed: Some(0.0),
            ..Default::default()
        };
        assert!(timescale(&zero).is_err());

        let too_fast = Timescale {
            rate: Some(10.5),
            ..Default::default()
        };
        assert!(timescale(&too_fast).is_err());
    }

    #[test]
    fn filter_records_are_checked_as_a_whole() {
        assert!(filters(&Filters::default()).is_ok());

        let ok = Filters {
            volume: Some(1.5),
            equalizer: Some(vec![Equalizer { band: 3, gain: 0.2 }]),
            timescale: Some(Timescale {
                speed: Some(1.2),
                pitch: Some(1.2),
                rate: None,
            }),
            ..Default::default()
        };
        assert!(filters(&ok).is_ok());

        let loud = Filters {
            volume: Some(9.0),
            ..Default::default()
        };
        assert!(matches!(filters(&loud), Err(Error::InvalidFilter(_))));

        let bad_band = Filters {
            equalizer: Some(vec![Equalizer { band: 99, gain: 5.0 }]),
            ..Default::default()
        };
        assert!(matches!(filters(&bad_band), Err(Error::InvalidFilter(_))));

        let frozen = Filters {
            timescale: Some(Timescale {
                speed: Some(0.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(filters(&frozen), Err(Error::InvalidFilter(_))));
    }

    #[test]
    fn bare_queries_get_a_search_prefix() {
        assert_eq!(
            search_query("  never gonna give you up  ", None),
            "ytsearch:never gonna give you up"
        );
        assert_eq!(
            search_query("some song", Some("scsearch")),
            "scsearch:some song"
        );
    }

    #[test]
    fn urls_and_prefixed_queries_pass_through() {
        assert_eq!(
            search_query("https://example.com/track", None),
            "https://example.com/track"
        );
        assert_eq!(search_query("scsearch:lofi", None), "scsearch:lofi");
    }

    #[test]
    fn queries_are_truncated() {
        let long = "x".repeat(600);

        let normalized = search_query(&long, None);

        assert_eq!(normalized.len(), "ytsearch:".len() + MAX_QUERY_LENGTH);
    }
}
