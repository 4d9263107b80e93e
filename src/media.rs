//! Technical attribute derivation: what the primary stage reads out of an
//! entity's media sources (resolution tier, HDR, Dolby Vision, audio layout,
//! music codec, e-book format).

use crate::model::{
    AudioKind, AudioLabel, EnrichmentRecord, Entity, ItemKind, MediaSource, MediaStream,
};

/// Knobs for label derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaOptions {
    /// Render "DV P8.1" instead of plain "DV".
    pub show_dv_profile: bool,
}

/// Build the primary record for an item.
///
/// `member` is the representative sub-item for composite entities (first
/// episode of a series or season, first track of an album). For composites
/// without a member the technical fields are simply absent.
pub fn derive_record(item: &Entity, member: Option<&Entity>, opts: MediaOptions) -> EnrichmentRecord {
    let mut record = EnrichmentRecord {
        rating: item.rating(),
        ..Default::default()
    };

    match item.kind {
        ItemKind::Series | ItemKind::Season => {
            if let Some(source) = member.and_then(Entity::primary_source) {
                apply_quality(&mut record, source, opts);
            }
        }
        ItemKind::MusicAlbum => {
            if let Some(source) = member.and_then(Entity::primary_source) {
                record.music_format = Some(music_format(source));
            }
        }
        ItemKind::Book => {
            record.book_format = Some(book_format(item, item.primary_source()));
        }
        _ => {
            if let Some(source) = item.primary_source() {
                apply_quality(&mut record, source, opts);
            }
        }
    }

    if item.kind == ItemKind::Season {
        record.season_current = item.child_count.filter(|&n| n > 0);
    }

    record
}

fn apply_quality(record: &mut EnrichmentRecord, source: &MediaSource, opts: MediaOptions) {
    if let Some((parts, audio)) = quality(source, opts) {
        record.quality = Some(parts);
        record.audio = audio;
    }
}

/// Resolution tier plus HDR/DV labels, and the audio label.
///
/// Returns `None` when the source has no video stream with a known height.
pub fn quality(source: &MediaSource, opts: MediaOptions) -> Option<(Vec<String>, Option<AudioLabel>)> {
    let video = source.video()?;
    let height = video.height.filter(|&h| h > 0)?;

    let tier = if height >= 1440 {
        "4K"
    } else if height >= 531 {
        "HD"
    } else {
        "SD"
    };

    let mut parts = vec![tier.to_string()];
    if is_hdr(video) {
        parts.push("HDR".to_string());
    }
    let dv = if opts.show_dv_profile {
        dolby_vision_label(video)
    } else if has_dolby_vision(video) {
        Some("DV".to_string())
    } else {
        None
    };
    if let Some(dv) = dv {
        parts.push(dv);
    }

    let audio: Vec<&MediaStream> = source.audio().collect();
    Some((parts, audio_label(&audio)))
}

fn range_and_format(stream: &MediaStream) -> (String, String) {
    (
        stream.video_range.as_deref().unwrap_or("").to_lowercase(),
        stream.hdr_format.as_deref().unwrap_or("").to_lowercase(),
    )
}

fn is_hdr(stream: &MediaStream) -> bool {
    let (range, format) = range_and_format(stream);
    ["hdr", "hlg", "pq"]
        .iter()
        .any(|m| range.contains(m) || format.contains(m))
}

/// "dolby vision", "dolbyvision", "dolby-vision" or "dovi".
fn mentions_dolby_vision(s: &str) -> bool {
    if s.contains("dovi") {
        return true;
    }
    let mut rest = s;
    while let Some(pos) = rest.find("dolby") {
        let after = &rest[pos + "dolby".len()..];
        if after.starts_with("vision") {
            return true;
        }
        let mut chars = after.chars();
        if chars.next().is_some() && chars.as_str().starts_with("vision") {
            return true;
        }
        rest = after;
    }
    false
}

pub fn has_dolby_vision(stream: &MediaStream) -> bool {
    if stream.dv_profile.is_some() {
        return true;
    }
    let (range, format) = range_and_format(stream);
    mentions_dolby_vision(&range) || mentions_dolby_vision(&format)
}

/// Dolby Vision label with profile, e.g. "DV P5" or "DV P8.1".
pub fn dolby_vision_label(stream: &MediaStream) -> Option<String> {
    let (range, format) = range_and_format(stream);
    let says_dv = ["dovi", "dolby"]
        .iter()
        .any(|m| range.contains(m) || format.contains(m));

    let Some(raw) = stream.dv_profile.as_deref() else {
        return says_dv.then(|| "DV".to_string());
    };

    let digits: String = raw
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let Ok(profile) = digits.parse::<u32>() else {
        return Some("DV".to_string());
    };

    match stream.dv_bl_compat_id.as_deref().map(str::trim) {
        Some(bl) if profile == 8 && !bl.is_empty() => Some(format!("DV\u{a0}P8.{bl}")),
        _ => Some(format!("DV\u{a0}P{profile}")),
    }
}

/// Channel count from the explicit field or a "5.1"-style layout.
pub fn channels(stream: &MediaStream) -> Option<u32> {
    if let Some(n) = stream.channels {
        return Some(n);
    }
    let layout = stream
        .channel_layout
        .as_deref()
        .or(stream.profile.as_deref())
        .unwrap_or("")
        .to_lowercase();

    // Scan for "<major>.<minor>"
    let bytes = layout.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'.' || i == 0 {
            continue;
        }
        let major: String = layout[..i]
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let minor: String = layout[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let (Ok(major), Ok(minor)) = (major.parse::<u32>(), minor.parse::<u32>()) {
            return Some(major + minor);
        }
    }
    None
}

pub fn audio_label(streams: &[&MediaStream]) -> Option<AudioLabel> {
    let atmos = streams.iter().any(|a| {
        let title = a.title.as_deref().unwrap_or("").to_lowercase();
        let codec = a.codec.as_deref().unwrap_or("").to_lowercase();
        title.contains("atmos") || codec.contains("atmos")
    });
    if atmos {
        return Some(AudioLabel {
            text: "ATMOS".to_string(),
            kind: AudioKind::Atmos,
        });
    }

    let best = streams.iter().map(|a| channels(a).unwrap_or(0)).max()?;
    if best >= 6 {
        Some(AudioLabel {
            text: "DD\u{a0}5.1".to_string(),
            kind: AudioKind::Dd51,
        })
    } else if best >= 2 {
        Some(AudioLabel {
            text: "Stereo".to_string(),
            kind: AudioKind::Stereo,
        })
    } else {
        None
    }
}

/// Codec name for an album track (FLAC, MP3, ...).
pub fn music_format(source: &MediaSource) -> String {
    let container = source.container.as_deref().unwrap_or("").to_lowercase();
    let raw = source
        .audio()
        .next()
        .and_then(|s| s.codec.clone())
        .or_else(|| source.audio_codec.clone())
        .unwrap_or_else(|| container.clone())
        .to_lowercase();

    let has = |needles: &[&str]| needles.iter().any(|n| raw.contains(n));

    let name = if has(&["flac"]) {
        "FLAC"
    } else if has(&["alac"]) {
        "ALAC"
    } else if has(&["aac", "m4a"]) || container.contains("m4a") {
        "AAC"
    } else if has(&["mp3"]) {
        "MP3"
    } else if has(&["opus"]) {
        "OPUS"
    } else if has(&["vorbis", "ogg"]) {
        "Vorbis"
    } else if has(&["wav", "pcm"]) {
        "WAV"
    } else if has(&["wma"]) {
        "WMA"
    } else if has(&["dsd", "dsf", "dff"]) {
        "DSD"
    } else if has(&["ape"]) {
        "APE"
    } else if !container.is_empty() {
        return container.to_uppercase();
    } else if raw.is_empty() {
        "AUDIO"
    } else {
        return raw.to_uppercase();
    };
    name.to_string()
}

/// E-book format from container, falling back to the file extension.
pub fn book_format(item: &Entity, source: Option<&MediaSource>) -> String {
    let container = source
        .and_then(|s| s.container.as_deref())
        .or(item.container.as_deref())
        .unwrap_or("")
        .to_lowercase();
    let path = source
        .and_then(|s| s.path.as_deref())
        .or(item.path.as_deref())
        .unwrap_or("")
        .to_lowercase();
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("");

    let src = if container.is_empty() { ext } else { container.as_str() };
    if src.is_empty() {
        return "BOOK".to_string();
    }

    let known = [
        ("epub", "EPUB"),
        ("pdf", "PDF"),
        ("mobi", "MOBI"),
        ("azw", "AZW3"),
        ("fb2", "FB2"),
        ("djvu", "DJVU"),
        ("cbz", "CBZ"),
        ("cbr", "CBR"),
    ];
    if let Some((_, name)) = known.iter().find(|(needle, _)| src.contains(needle)) {
        return name.to_string();
    }
    if src.contains("docx") {
        return "DOCX".to_string();
    }
    if src.contains("doc") {
        return "DOC".to_string();
    }
    if src.contains("rtf") {
        return "RTF".to_string();
    }
    if src.contains("txt") {
        return "TXT".to_string();
    }
    src.to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StreamKind;

    fn video(height: u32) -> MediaStream {
        let mut s = MediaStream::new(StreamKind::Video);
        s.height = Some(height);
        s
    }

    fn audio(channels: Option<u32>, layout: Option<&str>) -> MediaStream {
        let mut s = MediaStream::new(StreamKind::Audio);
        s.channels = channels;
        s.channel_layout = layout.map(str::to_string);
        s
    }

    #[test]
    fn tiers_follow_height_thresholds() {
        for (height, tier) in [(2160, "4K"), (1440, "4K"), (1080, "HD"), (531, "HD"), (480, "SD")] {
            let source = MediaSource {
                streams: vec![video(height)],
                ..Default::default()
            };
            let (parts, _) = quality(&source, MediaOptions::default()).unwrap();
            assert_eq!(parts[0], tier, "height {height}");
        }
    }

    #[test]
    fn hdr_and_dolby_vision_labels() {
        let mut v = video(2160);
        v.video_range = Some("HDR".into());
        v.hdr_format = Some("Dolby Vision".into());
        v.dv_profile = Some("8".into());
        v.dv_bl_compat_id = Some("1".into());
        let source = MediaSource {
            streams: vec![v],
            ..Default::default()
        };

        let (parts, _) = quality(&source, MediaOptions::default()).unwrap();
        assert_eq!(parts, vec!["4K", "HDR", "DV"]);

        let (parts, _) = quality(
            &source,
            MediaOptions {
                show_dv_profile: true,
            },
        )
        .unwrap();
        assert_eq!(parts[2], "DV\u{a0}P8.1");
    }

    #[test]
    fn missing_height_yields_no_quality() {
        let source = MediaSource {
            streams: vec![MediaStream::new(StreamKind::Video)],
            ..Default::default()
        };
        assert!(quality(&source, MediaOptions::default()).is_none());
    }

    #[test]
    fn channel_layout_parsing() {
        assert_eq!(channels(&audio(None, Some("5.1(side)"))), Some(6));
        assert_eq!(channels(&audio(None, Some("7.1"))), Some(8));
        assert_eq!(channels(&audio(Some(2), Some("5.1"))), Some(2));
        assert_eq!(channels(&audio(None, Some("stereo"))), None);
    }

    #[test]
    fn audio_label_prefers_atmos_then_channels() {
        let mut atmos = audio(Some(8), None);
        atmos.title = Some("TrueHD Atmos 7.1".into());
        let stereo = audio(Some(2), None);
        assert_eq!(audio_label(&[&stereo, &atmos]).unwrap().kind, AudioKind::Atmos);

        let surround = audio(None, Some("5.1"));
        assert_eq!(audio_label(&[&stereo, &surround]).unwrap().kind, AudioKind::Dd51);
        assert_eq!(audio_label(&[&stereo]).unwrap().kind, AudioKind::Stereo);
        assert!(audio_label(&[&audio(Some(1), None)]).is_none());
        assert!(audio_label(&[]).is_none());
    }

    #[test]
    fn music_and_book_formats() {
        let mut track = audio(Some(2), None);
        track.codec = Some("flac".into());
        let source = MediaSource {
            container: Some("flac".into()),
            streams: vec![track],
            ..Default::default()
        };
        assert_eq!(music_format(&source), "FLAC");

        let unknown = MediaSource {
            container: Some("mka".into()),
            ..Default::default()
        };
        assert_eq!(music_format(&unknown), "MKA");

        let mut book = Entity::new("b1", ItemKind::Book);
        book.path = Some("/books/Dune.epub".into());
        assert_eq!(book_format(&book, None), "EPUB");
        book.path = None;
        assert_eq!(book_format(&book, None), "BOOK");
    }

    #[test]
    fn season_without_member_still_gets_rating_and_count() {
        let mut season = Entity::new("s1", ItemKind::Season);
        season.community_rating = Some(8.26);
        season.child_count = Some(10);
        let record = derive_record(&season, None, MediaOptions::default());
        assert_eq!(record.rating, Some(8.26));
        assert_eq!(record.season_current, Some(10));
        assert!(record.quality.is_none());
    }
}
