//! Presentation labels for an enrichment record.
//!
//! Turns a record into an ordered list of badges (text plus colors) and
//! provides [`ConsoleSink`], a presentation sink that prints them.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;

use crate::model::{AudioKind, Delivery, DeliveryKind, EnrichmentRecord};
use crate::subscription::PresentationSink;

const DEFAULT_BG: &str = "#444444";
const ENDED_BG: &str = "#c62828";
const DOLBY_VISION_BG: &str = "#8000cc";
const MUSIC_BG: &str = "#7e57c2";
const BOOK_BG: &str = "#9e9d24";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    Ended,
    Quality,
    Audio,
    Music,
    Book,
    Episodes,
    Rating,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub kind: BadgeKind,
    pub text: String,
    pub background: &'static str,
    pub foreground: &'static str,
}

impl Badge {
    fn new(kind: BadgeKind, text: impl Into<String>, background: &'static str) -> Self {
        Self {
            kind,
            text: text.into(),
            background,
            foreground: text_color_for_background(background),
        }
    }
}

/// Badges in display order: ended, quality, audio, music, book, episodes,
/// rating.
pub fn badges(record: &EnrichmentRecord) -> Vec<Badge> {
    let mut out = Vec::new();

    if record.series_ended == Some(true) {
        out.push(Badge::new(BadgeKind::Ended, "Ended", ENDED_BG));
    }
    for part in record.quality.iter().flatten() {
        out.push(Badge::new(BadgeKind::Quality, part.clone(), quality_background(part)));
    }
    if let Some(audio) = &record.audio {
        let bg = match audio.kind {
            AudioKind::Atmos => "#00acc1",
            AudioKind::Dd51 => "#f4511e",
            AudioKind::Stereo => "#00897b",
        };
        out.push(Badge::new(BadgeKind::Audio, audio.text.clone(), bg));
    }
    if let Some(format) = &record.music_format {
        out.push(Badge::new(BadgeKind::Music, format.clone(), MUSIC_BG));
    }
    if let Some(format) = &record.book_format {
        out.push(Badge::new(BadgeKind::Book, format.clone(), BOOK_BG));
    }
    if let Some(text) = episodes_text(record.season_current, record.season_planned) {
        out.push(Badge::new(BadgeKind::Episodes, text, DEFAULT_BG));
    }
    if let Some(rating) = record.rating {
        let value = round_rating(rating);
        out.push(Badge::new(
            BadgeKind::Rating,
            format!("★ {value}"),
            rating_background(value),
        ));
    }
    out
}

fn quality_background(label: &str) -> &'static str {
    match label {
        "4K" => "#0066cc",
        "HD" => "#009900",
        "SD" => "#666666",
        "HDR" => "#cc0000",
        l if l.starts_with("DV") => DOLBY_VISION_BG,
        _ => DEFAULT_BG,
    }
}

/// "Ep cur/plan" when both are known and consistent, otherwise whichever
/// number is known.
pub fn episodes_text(current: Option<u32>, planned: Option<u32>) -> Option<String> {
    match (current, planned) {
        (Some(cur), Some(plan)) if plan > 0 && cur <= plan => Some(format!("Ep {cur}/{plan}")),
        (Some(cur), Some(plan)) if plan > 0 => Some(format!("Ep {cur}")),
        (_, Some(plan)) => Some(format!("Ep {plan}")),
        (Some(cur), None) => Some(format!("Ep {cur}")),
        (None, None) => None,
    }
}

/// One decimal place.
pub fn round_rating(rating: f64) -> f64 {
    (rating * 10.0).round() / 10.0
}

/// Five-band palette from red to green.
pub fn rating_background(rating: f64) -> &'static str {
    if rating < 4.0 {
        "#c62828"
    } else if rating < 6.0 {
        "#ef6c00"
    } else if rating < 7.0 {
        "#f9a825"
    } else if rating < 8.0 {
        "#7cb342"
    } else {
        "#2e7d32"
    }
}

/// Dark text on light backgrounds, white otherwise (WCAG relative luminance).
pub fn text_color_for_background(hex: &str) -> &'static str {
    let Some((r, g, b)) = parse_hex(hex) else {
        return "#ffffff";
    };
    let channel = |v: u8| {
        let v = f64::from(v) / 255.0;
        if v <= 0.03928 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        }
    };
    let luminance = 0.2126 * channel(r) + 0.7152 * channel(g) + 0.0722 * channel(b);
    if luminance > 0.6 { "#111111" } else { "#ffffff" }
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let h = hex.trim_start_matches('#');
    let full: String = match h.len() {
        3 => h.chars().flat_map(|c| [c, c]).collect(),
        6 => h.to_string(),
        _ => return None,
    };
    let n = u32::from_str_radix(&full, 16).ok()?;
    Some(((n >> 16) as u8, (n >> 8) as u8, n as u8))
}

/// `key kind: badge badge ...`
pub fn render_line(delivery: &Delivery) -> String {
    let kind = match delivery.kind {
        DeliveryKind::First => "first",
        DeliveryKind::Update => "update",
    };
    let labels: Vec<String> = badges(&delivery.record)
        .into_iter()
        .map(|b| format!("[{}]", b.text))
        .collect();
    if labels.is_empty() {
        format!("{} {kind}: (none)", delivery.key)
    } else {
        format!("{} {kind}: {}", delivery.key, labels.join(" "))
    }
}

/// Prints one line per delivery.
pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl PresentationSink for ConsoleSink {
    fn deliver(&self, delivery: &Delivery) {
        let line = render_line(delivery);
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "console sink write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioLabel, ItemKey};

    #[test]
    fn full_record_orders_badges() {
        let record = EnrichmentRecord {
            quality: Some(vec!["4K".into(), "HDR".into(), "DV".into()]),
            audio: Some(AudioLabel {
                text: "ATMOS".into(),
                kind: AudioKind::Atmos,
            }),
            rating: Some(7.46),
            season_current: Some(3),
            season_planned: Some(10),
            series_ended: Some(true),
            ..Default::default()
        };
        let texts: Vec<String> = badges(&record).into_iter().map(|b| b.text).collect();
        assert_eq!(
            texts,
            vec!["Ended", "4K", "HDR", "DV", "ATMOS", "Ep 3/10", "★ 7.5"]
        );
    }

    #[test]
    fn not_ended_series_has_no_badge() {
        let record = EnrichmentRecord {
            series_ended: Some(false),
            ..Default::default()
        };
        assert!(badges(&record).is_empty());
    }

    #[test]
    fn episode_text_variants() {
        assert_eq!(episodes_text(Some(3), Some(10)).as_deref(), Some("Ep 3/10"));
        assert_eq!(episodes_text(Some(12), Some(10)).as_deref(), Some("Ep 12"));
        assert_eq!(episodes_text(None, Some(10)).as_deref(), Some("Ep 10"));
        assert_eq!(episodes_text(Some(4), None).as_deref(), Some("Ep 4"));
        assert_eq!(episodes_text(None, None), None);
    }

    #[test]
    fn rating_palette_and_contrast() {
        assert_eq!(rating_background(3.9), "#c62828");
        assert_eq!(rating_background(6.5), "#f9a825");
        assert_eq!(rating_background(8.0), "#2e7d32");
        assert_eq!(text_color_for_background("#f0f0f0"), "#111111");
        assert_eq!(text_color_for_background("#c62828"), "#ffffff");
        assert_eq!(text_color_for_background("#fff"), "#111111");
        assert_eq!(round_rating(6.849), 6.8);
    }

    #[test]
    fn console_line_for_empty_record() {
        let line = render_line(&Delivery {
            key: ItemKey::from("abc"),
            kind: DeliveryKind::First,
            record: EnrichmentRecord::default(),
            changed: vec![],
        });
        assert_eq!(line, "abc first: (none)");
    }
}
