//! Master HLS manifest parsing and variant selection.

use serde::{Deserialize, Serialize};

/// One variant in a master manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub bandwidth: i64,
    pub resolution: String,
    pub codecs: String,
    /// `VIDEO` group id; `audio_only` marks the audio-only variant.
    pub video: String,
    pub frame_rate: f64,
    pub url: String,
}

/// Parse a master M3U8 manifest into its variants, in source order.
pub fn parse_master_playlist(body: &str) -> Vec<Playlist> {
    let mut playlists = Vec::new();
    let mut current = Playlist::default();

    for line in body.lines() {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            current = Playlist::default();
            for attribute in split_by_comma_avoid_quote(attrs) {
                let Some((key, value)) = attribute.split_once('=') else {
                    continue;
                };
                let value = value.trim_matches('"');
                match key {
                    "BANDWIDTH" => current.bandwidth = value.parse().unwrap_or(0),
                    "RESOLUTION" => current.resolution = value.to_string(),
                    "CODECS" => current.codecs = value.to_string(),
                    "FRAME-RATE" => current.frame_rate = value.parse().unwrap_or(0.0),
                    "VIDEO" => current.video = value.to_string(),
                    _ => {}
                }
            }
        } else if line.starts_with("https://") {
            current.url = line.to_string();
            playlists.push(std::mem::take(&mut current));
        }
    }
    playlists
}

/// Split M3U8 attribute lists on commas, ignoring commas inside quotes.
fn split_by_comma_avoid_quote(s: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape_next = false;

    for c in s.chars() {
        match c {
            ',' if !in_quotes => {
                result.push(current.trim().to_string());
                current.clear();
            }
            '"' => {
                if escape_next {
                    current.push(c);
                    escape_next = false;
                } else {
                    in_quotes = !in_quotes;
                    current.push(c);
                }
            }
            '\\' if in_quotes => escape_next = true,
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        result.push(current.trim().to_string());
    }
    result
}

/// Quality bounds used to filter variants. A zero bound means "no bound";
/// all bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistConstraint {
    pub min_bandwidth: i64,
    pub max_bandwidth: i64,
    pub min_height: i64,
    pub max_height: i64,
    pub min_width: i64,
    pub max_width: i64,
    pub min_frame_rate: f64,
    pub max_frame_rate: f64,
    pub audio_only: bool,
    /// Variant URLs ruled out at runtime after failed probes.
    #[serde(skip)]
    pub ignored_urls: Vec<String>,
}

impl PlaylistConstraint {
    fn matches(&self, playlist: &Playlist) -> bool {
        let (width, height) = parse_resolution(&playlist.resolution);
        if self.ignored_urls.iter().any(|u| u == &playlist.url) {
            return false;
        }
        if self.min_bandwidth > 0 && playlist.bandwidth < self.min_bandwidth {
            return false;
        }
        if self.max_bandwidth > 0 && playlist.bandwidth > self.max_bandwidth {
            return false;
        }
        if self.min_height > 0 && height < self.min_height {
            return false;
        }
        if self.max_height > 0 && height > self.max_height {
            return false;
        }
        if self.min_width > 0 && width < self.min_width {
            return false;
        }
        if self.max_width > 0 && width > self.max_width {
            return false;
        }
        if self.min_frame_rate > 0.0 && playlist.frame_rate < self.min_frame_rate {
            return false;
        }
        if self.max_frame_rate > 0.0 && playlist.frame_rate > self.max_frame_rate {
            return false;
        }
        if self.audio_only && playlist.video != "audio_only" {
            return false;
        }
        true
    }
}

fn parse_resolution(resolution: &str) -> (i64, i64) {
    match resolution.split_once('x') {
        Some((w, h)) => (w.parse().unwrap_or(0), h.parse().unwrap_or(0)),
        None => (0, 0),
    }
}

/// Ordering of variants: higher resolution first, then higher frame rate,
/// then higher bandwidth.
fn compare(a: &Playlist, b: &Playlist) -> std::cmp::Ordering {
    let (_, ha) = parse_resolution(&a.resolution);
    let (_, hb) = parse_resolution(&b.resolution);
    ha.cmp(&hb)
        .then(a.frame_rate.total_cmp(&b.frame_rate))
        .then(a.bandwidth.cmp(&b.bandwidth))
}

/// Return the best variant satisfying the constraint, or `None` when no
/// variant matches.
pub fn best_playlist<'a>(
    playlists: &'a [Playlist],
    constraint: &PlaylistConstraint,
) -> Option<&'a Playlist> {
    playlists
        .iter()
        .filter(|p| constraint.matches(p))
        .max_by(|a, b| compare(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "#EXTM3U\n\
#EXT-X-SESSION-DATA:DATA-ID=\"BLABLA\",VALUE=\"BLABLA\"\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"720p60\",NAME=\"720p60\",AUTOSELECT=YES,DEFAULT=YES\n\
#EXT-X-STREAM-INF:BANDWIDTH=3002999,RESOLUTION=1280x720,CODECS=\"avc1.4D401F,mp4a.40.2\",VIDEO=\"720p60\",FRAME-RATE=60.000\n\
https://video-weaver.example.net/v1/playlist/720p60.m3u8\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"480p30\",NAME=\"480p\",AUTOSELECT=YES,DEFAULT=YES\n\
#EXT-X-STREAM-INF:BANDWIDTH=1323000,RESOLUTION=852x480,CODECS=\"avc1.4D401F,mp4a.40.2\",VIDEO=\"480p30\",FRAME-RATE=30.000\n\
https://video-weaver.example.net/v1/playlist/480p30.m3u8\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"360p30\",NAME=\"360p\",AUTOSELECT=YES,DEFAULT=YES\n\
#EXT-X-STREAM-INF:BANDWIDTH=700000,RESOLUTION=640x360,CODECS=\"avc1.4D401F,mp4a.40.2\",VIDEO=\"360p30\",FRAME-RATE=30.000\n\
https://video-weaver.example.net/v1/playlist/360p30.m3u8\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"160p30\",NAME=\"160p\",AUTOSELECT=YES,DEFAULT=YES\n\
#EXT-X-STREAM-INF:BANDWIDTH=270000,RESOLUTION=284x160,CODECS=\"avc1.4D401F,mp4a.40.2\",VIDEO=\"160p30\",FRAME-RATE=30.000\n\
https://video-weaver.example.net/v1/playlist/160p30.m3u8\n\
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"audio_only\",NAME=\"audio_only\",AUTOSELECT=NO,DEFAULT=NO\n\
#EXT-X-STREAM-INF:BANDWIDTH=160000,CODECS=\"mp4a.40.2\",VIDEO=\"audio_only\"\n\
https://video-weaver.example.net/v1/playlist/audio_only.m3u8\n";

    #[test]
    fn test_parse_master_playlist() {
        let playlists = parse_master_playlist(FIXTURE);
        assert_eq!(playlists.len(), 5);

        let bandwidths: Vec<i64> = playlists.iter().map(|p| p.bandwidth).collect();
        assert_eq!(bandwidths, [3002999, 1323000, 700000, 270000, 160000]);

        let resolutions: Vec<&str> = playlists.iter().map(|p| p.resolution.as_str()).collect();
        assert_eq!(resolutions, ["1280x720", "852x480", "640x360", "284x160", ""]);

        let frame_rates: Vec<f64> = playlists.iter().map(|p| p.frame_rate).collect();
        assert_eq!(frame_rates, [60.0, 30.0, 30.0, 30.0, 0.0]);

        let videos: Vec<&str> = playlists.iter().map(|p| p.video.as_str()).collect();
        assert_eq!(videos, ["720p60", "480p30", "360p30", "160p30", "audio_only"]);

        assert_eq!(
            playlists[0].url,
            "https://video-weaver.example.net/v1/playlist/720p60.m3u8"
        );
        assert_eq!(playlists[0].codecs, "avc1.4D401F,mp4a.40.2");
    }

    fn fixture_plus_synthetic() -> Vec<Playlist> {
        let mut playlists = vec![
            Playlist {
                bandwidth: 3002999,
                resolution: "1280x720".into(),
                codecs: "avc1.4D401F,mp4a.40.2".into(),
                video: "720p60".into(),
                frame_rate: 30.0,
                url: "https://video-weaver.example.net/v1/playlist/synthetic-a.m3u8".into(),
            },
            Playlist {
                bandwidth: 1000,
                resolution: "1280x720".into(),
                codecs: "avc1.4D401F,mp4a.40.2".into(),
                video: "720p60".into(),
                frame_rate: 60.0,
                url: "https://video-weaver.example.net/v1/playlist/synthetic-b.m3u8".into(),
            },
        ];
        playlists.extend(parse_master_playlist(FIXTURE));
        playlists
    }

    #[test]
    fn test_best_playlist_no_constraint() {
        // Highest resolution first, then frame rate, then bandwidth:
        // the 720p entry at 3 002 999 bps wins.
        let playlists = fixture_plus_synthetic();
        let best = best_playlist(&playlists, &PlaylistConstraint::default()).unwrap();
        assert_eq!(best.resolution, "1280x720");
        assert_eq!(best.bandwidth, 3002999);
        assert_eq!(best.frame_rate, 60.0);
    }

    #[test]
    fn test_best_playlist_max_width() {
        let playlists = fixture_plus_synthetic();
        let constraint = PlaylistConstraint {
            max_width: 640,
            ..Default::default()
        };
        let best = best_playlist(&playlists, &constraint).unwrap();
        assert_eq!(best.resolution, "640x360");
        assert_eq!(best.bandwidth, 700000);
    }

    #[test]
    fn test_best_playlist_audio_only() {
        let playlists = fixture_plus_synthetic();
        let constraint = PlaylistConstraint {
            audio_only: true,
            ..Default::default()
        };
        let best = best_playlist(&playlists, &constraint).unwrap();
        assert_eq!(best.video, "audio_only");
        assert_eq!(best.bandwidth, 160000);
    }

    #[test]
    fn test_best_playlist_none_matches() {
        let playlists = fixture_plus_synthetic();
        let constraint = PlaylistConstraint {
            min_height: 4000,
            ..Default::default()
        };
        assert!(best_playlist(&playlists, &constraint).is_none());
    }

    #[test]
    fn test_best_playlist_skips_ignored_urls() {
        let playlists = parse_master_playlist(FIXTURE);
        let constraint = PlaylistConstraint {
            ignored_urls: vec!["https://video-weaver.example.net/v1/playlist/720p60.m3u8".into()],
            ..Default::default()
        };
        let best = best_playlist(&playlists, &constraint).unwrap();
        assert_eq!(best.resolution, "852x480");
    }

    #[test]
    fn test_inclusive_bounds() {
        let playlists = parse_master_playlist(FIXTURE);
        let constraint = PlaylistConstraint {
            min_height: 360,
            max_height: 360,
            ..Default::default()
        };
        let best = best_playlist(&playlists, &constraint).unwrap();
        assert_eq!(best.resolution, "640x360");
    }

    #[test]
    fn test_attribute_split_respects_quotes() {
        let parts =
            split_by_comma_avoid_quote("BANDWIDTH=1000,CODECS=\"avc1.4D401F,mp4a.40.2\",X=1");
        assert_eq!(
            parts,
            ["BANDWIDTH=1000", "CODECS=\"avc1.4D401F,mp4a.40.2\"", "X=1"]
        );
    }
}
