//! Track analysis models.
//!
//! A [`TrackAnalysis`] is the static, precomputed description of a track
//! (beat grid, structural sections, tempo) supplied by the music
//! collaborator. [`ProcessedAnalysis`] derives the per-index metadata the
//! tracker and the automation engine consume: downbeat flags, measure
//! positions and section types.

use serde::{Deserialize, Serialize};

/// A track as known by the music collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Track length in seconds.
    pub duration: f64,
}

/// A single beat in the analysis beat grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    /// Offset from track start, in seconds.
    pub start: f64,
    pub duration: f64,
    pub confidence: f64,
}

/// A structural section of the track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Offset from track start, in seconds.
    pub start: f64,
    pub duration: f64,
    /// Average loudness in dB (typically negative).
    pub loudness: f64,
    pub tempo: f64,
    /// Confidence of the tempo estimate, in [0, 1].
    pub tempo_confidence: f64,
}

/// Full precomputed analysis for one track.
///
/// Immutable once attached to a tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAnalysis {
    pub beats: Vec<Beat>,
    pub sections: Vec<Section>,
    pub tempo: f64,
    /// Track length in seconds.
    pub duration: f64,
    /// Beats per measure. Defaults to 4 when the analysis omits it.
    #[serde(default = "default_time_signature")]
    pub time_signature: u32,
}

fn default_time_signature() -> u32 {
    4
}

/// Per-beat metadata derived from the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatInfo {
    pub is_downbeat: bool,
    /// Position within the measure, 0-based.
    pub measure_position: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_beat_start: Option<f64>,
}

/// Classified section type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Intro,
    Verse,
    Chorus,
    Bridge,
    Outro,
}

impl SectionType {
    pub const ALL: [SectionType; 5] = [
        SectionType::Intro,
        SectionType::Verse,
        SectionType::Chorus,
        SectionType::Bridge,
        SectionType::Outro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Intro => "intro",
            SectionType::Verse => "verse",
            SectionType::Chorus => "chorus",
            SectionType::Bridge => "bridge",
            SectionType::Outro => "outro",
        }
    }
}

impl std::fmt::Display for SectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-section metadata derived from the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionInfo {
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub index: usize,
}

/// Derived per-index maps over an analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedAnalysis {
    pub beat_map: Vec<BeatInfo>,
    pub section_map: Vec<SectionInfo>,
}

impl ProcessedAnalysis {
    /// Derive beat and section maps from an analysis.
    ///
    /// The downbeat grid uses the analysis' time signature rather than a
    /// fixed 4/4 meter; a missing or zero signature falls back to 4.
    pub fn derive(analysis: &TrackAnalysis) -> Self {
        let meter = if analysis.time_signature == 0 {
            4
        } else {
            analysis.time_signature
        };

        let beat_map = analysis
            .beats
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let position = (i as u32) % meter;
                BeatInfo {
                    is_downbeat: position == 0,
                    measure_position: position,
                    next_beat_start: analysis.beats.get(i + 1).map(|b| b.start),
                }
            })
            .collect();

        let section_map = analysis
            .sections
            .iter()
            .enumerate()
            .map(|(i, section)| SectionInfo {
                section_type: classify_section(section, i, analysis.sections.len()),
                index: i,
            })
            .collect();

        Self {
            beat_map,
            section_map,
        }
    }

    pub fn total_beats(&self) -> usize {
        self.beat_map.len()
    }

    pub fn total_sections(&self) -> usize {
        self.section_map.len()
    }
}

/// Fixed section-type heuristic.
///
/// First section is the intro, last the outro; loud sections are choruses,
/// tempo-uncertain sections bridges, everything else a verse. Crude and not
/// genre-aware, but deterministic.
fn classify_section(section: &Section, index: usize, total: usize) -> SectionType {
    if index == 0 {
        SectionType::Intro
    } else if total > 1 && index == total - 1 {
        SectionType::Outro
    } else if section.loudness > -5.0 {
        SectionType::Chorus
    } else if section.tempo_confidence < 0.5 {
        SectionType::Bridge
    } else {
        SectionType::Verse
    }
}

/// Index of the entry whose `[start, next.start)` window contains `t`.
///
/// The last entry's window extends to infinity, matching the polling
/// semantics where the final beat stays current until the track ends.
pub fn index_at(starts: impl Iterator<Item = f64> + Clone, t: f64) -> Option<usize> {
    let mut current = None;
    for (i, start) in starts.enumerate() {
        if t >= start {
            current = Some(i);
        } else {
            break;
        }
    }
    current
}

/// Index of the beat whose `[start, start + duration)` interval contains `t`.
pub fn containing_beat_index(beats: &[Beat], t: f64) -> Option<usize> {
    beats
        .iter()
        .position(|b| t >= b.start && t < b.start + b.duration)
}

/// Index of the section whose `[start, start + duration)` interval contains `t`.
pub fn containing_section_index(sections: &[Section], t: f64) -> Option<usize> {
    sections
        .iter()
        .position(|s| t >= s.start && t < s.start + s.duration)
}

#[cfg(test)]
pub mod test_fixtures {
    use super::*;

    /// Evenly spaced beat grid starting at `start`, `interval` seconds apart.
    pub fn beat_grid(count: usize, start: f64, interval: f64) -> Vec<Beat> {
        (0..count)
            .map(|i| Beat {
                start: start + i as f64 * interval,
                duration: interval,
                confidence: 0.9,
            })
            .collect()
    }

    pub fn section(start: f64, duration: f64, loudness: f64, tempo_confidence: f64) -> Section {
        Section {
            start,
            duration,
            loudness,
            tempo: 120.0,
            tempo_confidence,
        }
    }

    /// A 4/4 analysis with 8 beats at 0.5s spacing and three sections.
    pub fn simple_analysis() -> TrackAnalysis {
        TrackAnalysis {
            beats: beat_grid(8, 0.0, 0.5),
            sections: vec![
                section(0.0, 1.5, -12.0, 0.9),
                section(1.5, 1.5, -3.0, 0.9),
                section(3.0, 1.0, -10.0, 0.9),
            ],
            tempo: 120.0,
            duration: 4.0,
            time_signature: 4,
        }
    }

    pub fn track(duration: f64) -> Track {
        Track {
            id: "track-1".to_string(),
            title: "Test Track".to_string(),
            artist: "Test Artist".to_string(),
            duration,
        }
    }
}
