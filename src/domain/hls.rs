//! HLS media playlist model: parsing the engine's manifest and rendering the
//! published one.

use std::fmt::Write as _;
use std::path::Path;
use tokio::fs;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlaylistError {
    #[error("playlist does not start with #EXTM3U")]
    MissingHeader,
    #[error("line {line}: invalid tag value {value:?}")]
    InvalidTag { line: usize, value: String },
    #[error("line {line}: segment uri {uri:?} has no preceding #EXTINF")]
    UriWithoutDuration { line: usize, uri: String },
    #[error("playlist lists no segments")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub duration: f64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: u8,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<MediaSegment>,
    pub end_list: bool,
    pub playlist_type: Option<String>,
    pub independent_segments: bool,
}

impl MediaPlaylist {
    pub fn new(target_duration: u64) -> Self {
        Self {
            version: 3, // MPEG-TS segments need nothing newer
            target_duration,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: true,
            playlist_type: None,
            independent_segments: false,
        }
    }

    pub fn add_segment(&mut self, duration: f64, uri: String) {
        self.segments.push(MediaSegment { duration, uri });
    }

    /// Parse a media playlist. Tags this model does not carry are skipped.
    pub fn parse(text: &str) -> Result<Self, PlaylistError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        match lines.next() {
            Some((_, "#EXTM3U")) => {}
            _ => return Err(PlaylistError::MissingHeader),
        }

        let mut playlist = MediaPlaylist::new(0);
        playlist.end_list = false;
        let mut pending_duration: Option<f64> = None;

        for (line, content) in lines {
            if let Some(tag) = content.strip_prefix('#') {
                let (name, value) = tag.split_once(':').unwrap_or((tag, ""));
                let invalid = || PlaylistError::InvalidTag {
                    line,
                    value: value.to_owned(),
                };
                match name {
                    "EXT-X-VERSION" => playlist.version = value.parse().map_err(|_| invalid())?,
                    "EXT-X-TARGETDURATION" => {
                        playlist.target_duration = value.parse().map_err(|_| invalid())?
                    }
                    "EXT-X-MEDIA-SEQUENCE" => {
                        playlist.media_sequence = value.parse().map_err(|_| invalid())?
                    }
                    "EXT-X-PLAYLIST-TYPE" => playlist.playlist_type = Some(value.to_owned()),
                    "EXT-X-INDEPENDENT-SEGMENTS" => playlist.independent_segments = true,
                    "EXT-X-ENDLIST" => playlist.end_list = true,
                    "EXTINF" => {
                        let duration = value.split(',').next().unwrap_or_default();
                        pending_duration = Some(duration.parse().map_err(|_| invalid())?);
                    }
                    _ => {}
                }
            } else {
                let duration =
                    pending_duration
                        .take()
                        .ok_or_else(|| PlaylistError::UriWithoutDuration {
                            line,
                            uri: content.to_owned(),
                        })?;
                playlist.add_segment(duration, content.to_owned());
            }
        }

        if playlist.segments.is_empty() {
            return Err(PlaylistError::Empty);
        }
        Ok(playlist)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        // Writing into a String cannot fail.
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);

        if let Some(pt) = &self.playlist_type {
            let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:{}", pt);
        }

        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }

        for segment in &self.segments {
            // Using {:.6} for reasonable precision on float duration
            let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration);
            out.push_str(&segment.uri);
            out.push('\n');
        }

        if self.end_list {
            out.push_str("#EXT-X-ENDLIST\n");
        }

        out
    }

    /// Rebase every segment uri onto `base`, e.g. `/video/<id>/`.
    pub fn rebase(&mut self, base: &str) {
        for segment in &mut self.segments {
            segment.uri = format!("{}{}", base, segment.uri);
        }
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        fs::write(path, self.render()).await
    }
}
