//! Mood classification.
//!
//! A deterministic, explainable classifier: a fixed, ordered list of
//! threshold rules over the track's audio features, plus an optional second
//! pass over structural segments. Every rule that fires contributes a
//! `(mood, confidence)` candidate and the strictly highest confidence wins;
//! ties resolve to declaration order. Not a trained model, and it must stay
//! that way for testability.

use serde::{Deserialize, Serialize};

/// Classified mood label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Party,
    Chill,
    Acoustic,
    Dance,
    Intense,
    Dark,
    Bright,
    Experimental,
    Dreamy,
    Epic,
    Meditative,
    Neutral,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Party => "party",
            Mood::Chill => "chill",
            Mood::Acoustic => "acoustic",
            Mood::Dance => "dance",
            Mood::Intense => "intense",
            Mood::Dark => "dark",
            Mood::Bright => "bright",
            Mood::Experimental => "experimental",
            Mood::Dreamy => "dreamy",
            Mood::Epic => "epic",
            Mood::Meditative => "meditative",
            Mood::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Track-level audio features, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub energy: f64,
    pub valence: f64,
    pub danceability: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
}

/// One structural segment of the track with pitch, timbre and loudness data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralSegment {
    pub start: f64,
    pub duration: f64,
    /// Segment loudness in dB.
    pub loudness: f64,
    /// Chroma vector: strength of each of the 12 pitch classes, in [0, 1].
    pub pitches: Vec<f64>,
    /// Timbre coefficients (unbounded).
    pub timbre: Vec<f64>,
}

/// Classification result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoodResult {
    pub mood: Mood,
    pub confidence: f64,
}

// Segment-pass thresholds. Fixed constants keep the classifier explainable.
const DOMINANT_PITCH_SHARE: f64 = 2.0 / 12.0;
const BRIGHT_CLASS_CUTOFF: usize = 6;
const TIMBRE_VARIANCE_HIGH: f64 = 2500.0;
const TIMBRE_VARIANCE_LOW: f64 = 400.0;
const LOUDNESS_VARIANCE_LOW: f64 = 4.0;
const LOUDNESS_RANGE_EPIC_DB: f64 = 20.0;
const LOUDNESS_RANGE_MEDITATIVE_DB: f64 = 6.0;

/// Classify a track's mood from its features and optional segment data.
///
/// With no firing rule the result is `neutral` at confidence 0.
pub fn classify(features: &AudioFeatures, segments: Option<&[StructuralSegment]>) -> MoodResult {
    let mut candidates: Vec<MoodResult> = Vec::new();
    let mut push = |mood: Mood, confidence: f64| {
        candidates.push(MoodResult { mood, confidence });
    };

    // Base threshold rules, in declaration order.
    if features.energy > 0.8 && features.valence > 0.7 {
        push(Mood::Party, 0.9);
    }
    if features.energy < 0.3 && features.valence < 0.4 {
        push(Mood::Chill, 0.8);
    }
    if features.acousticness > 0.7 {
        push(Mood::Acoustic, 0.8);
    }
    if features.danceability > 0.7 {
        push(Mood::Dance, 0.7);
    }
    if features.energy > 0.6 && features.valence < 0.4 {
        push(Mood::Intense, 0.7);
    }

    if let Some(segments) = segments {
        if !segments.is_empty() {
            segment_pass(segments, &mut push);
        }
    }

    // Strictly highest confidence wins; ties resolve to declaration order.
    let mut winner = MoodResult {
        mood: Mood::Neutral,
        confidence: 0.0,
    };
    for candidate in candidates {
        if candidate.confidence > winner.confidence {
            winner = candidate;
        }
    }
    winner
}

/// Second pass over structural segments.
fn segment_pass(segments: &[StructuralSegment], push: &mut impl FnMut(Mood, f64)) {
    // Pitch-class histogram: a strongly dominant class reads as focused
    // tonality, labelled bright or dark by where it sits in the chroma.
    let mut histogram = [0.0f64; 12];
    for segment in segments {
        for (class, strength) in segment.pitches.iter().take(12).enumerate() {
            histogram[class] += strength;
        }
    }
    let total: f64 = histogram.iter().sum();
    if total > 0.0 {
        let (dominant_class, dominant_mass) = histogram
            .iter()
            .enumerate()
            .fold((0, 0.0), |best, (i, &m)| if m > best.1 { (i, m) } else { best });
        if dominant_mass / total >= DOMINANT_PITCH_SHARE {
            if dominant_class >= BRIGHT_CLASS_CUTOFF {
                push(Mood::Bright, 0.6);
            } else {
                push(Mood::Dark, 0.6);
            }
        }
    }

    let timbre_var = mean_coefficient_variance(segments);
    let loudness_var = variance(segments.iter().map(|s| s.loudness));

    if timbre_var > TIMBRE_VARIANCE_HIGH {
        push(Mood::Experimental, 0.65);
    } else if timbre_var < TIMBRE_VARIANCE_LOW && loudness_var < LOUDNESS_VARIANCE_LOW {
        push(Mood::Dreamy, 0.6);
    }

    let loudness_min = segments.iter().map(|s| s.loudness).fold(f64::INFINITY, f64::min);
    let loudness_max = segments
        .iter()
        .map(|s| s.loudness)
        .fold(f64::NEG_INFINITY, f64::max);
    let loudness_range = loudness_max - loudness_min;

    if loudness_range > LOUDNESS_RANGE_EPIC_DB {
        push(Mood::Epic, 0.75);
    } else if loudness_range < LOUDNESS_RANGE_MEDITATIVE_DB && loudness_var < LOUDNESS_VARIANCE_LOW
    {
        push(Mood::Meditative, 0.7);
    }
}

/// Per-coefficient variance across segments, averaged over coefficients.
fn mean_coefficient_variance(segments: &[StructuralSegment]) -> f64 {
    let coeff_count = segments.iter().map(|s| s.timbre.len()).min().unwrap_or(0);
    if coeff_count == 0 {
        return 0.0;
    }
    let total: f64 = (0..coeff_count)
        .map(|c| variance(segments.iter().map(|s| s.timbre[c])))
        .sum();
    total / coeff_count as f64
}

fn variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count();
    if count == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64
}
