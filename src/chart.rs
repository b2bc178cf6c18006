//! Chart parsing: tempo, note events, layout metadata and difficulty buckets

use crate::config::GridConfig;
use crate::error::{ManiaError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const TIMING_SECTION: &str = "[TimingPoints]";
const NOTE_SECTION: &str = "[HitObjects]";

/// Game mode id of mania charts
pub const MANIA_MODE: u32 = 3;

/// Shortest accepted beat length, i.e. 60000 BPM
pub const MIN_BEAT_LENGTH_MS: f64 = 1.0;

/// Tempo derived from the first timing directive of a chart
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoInfo {
    pub beats_per_minute: f64,
    pub start_time_ms: f64,
}

impl TempoInfo {
    /// Duration of one quarter note in milliseconds
    pub fn beat_ms(&self) -> f64 {
        60_000.0 / self.beats_per_minute
    }
}

/// All hits sharing one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub time_ms: f64,
    pub lane_flags: Vec<bool>,
}

/// Layout metadata read from the `[General]` and `[Difficulty]` sections
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartMetadata {
    pub mode: Option<u32>,
    pub key_count: Option<u32>,
}

impl ChartMetadata {
    /// True for mania charts played on exactly `num_lanes` keys
    pub fn matches_layout(&self, num_lanes: usize) -> bool {
        self.mode.unwrap_or(0) == MANIA_MODE && self.key_count == Some(num_lanes as u32)
    }
}

/// Parsed timing and note content of one chart
#[derive(Debug, Clone)]
pub struct ParsedChart {
    pub tempo: TempoInfo,
    pub notes: Vec<NoteEvent>,
    pub metadata: ChartMetadata,
    /// Hit-object lines read before merging
    pub hit_count: usize,
}

impl ParsedChart {
    pub fn last_note_time_ms(&self) -> Option<f64> {
        self.notes.last().map(|n| n.time_ms)
    }
}

fn is_section_header(line: &str) -> bool {
    line.starts_with('[') && line.ends_with(']')
}

fn is_skippable_line(line: &str) -> bool {
    line.is_empty() || line.starts_with("//")
}

fn find_section(lines: &[&str], header: &str) -> Option<usize> {
    lines.iter().position(|l| l.trim().starts_with(header))
}

/// Lines belonging to the section starting after `header_idx`
fn section_body<'a>(lines: &'a [&'a str], header_idx: usize) -> impl Iterator<Item = &'a str> + 'a {
    lines[header_idx + 1..]
        .iter()
        .map(|l| l.trim())
        .take_while(|l| !is_section_header(l))
        .filter(|l| !is_skippable_line(l))
}

/// Read the tempo from the first timing directive (`offset,beat_length,...`)
pub fn parse_tempo(lines: &[&str]) -> Result<TempoInfo> {
    let header = find_section(lines, TIMING_SECTION)
        .ok_or_else(|| ManiaError::MalformedChart("no [TimingPoints] section".to_string()))?;

    let directive = section_body(lines, header).next().ok_or_else(|| {
        ManiaError::MalformedChart("[TimingPoints] section has no directive".to_string())
    })?;

    let mut fields = directive.split(',').map(str::trim);
    let start_time_ms = fields
        .next()
        .and_then(|f| f.parse::<f64>().ok())
        .ok_or_else(|| {
            ManiaError::MalformedChart(format!("unreadable timing offset in '{}'", directive))
        })?;
    let beat_length = fields
        .next()
        .and_then(|f| f.parse::<f64>().ok())
        .ok_or_else(|| {
            ManiaError::MalformedChart(format!("unreadable beat length in '{}'", directive))
        })?;

    if !(beat_length >= MIN_BEAT_LENGTH_MS) || !beat_length.is_finite() {
        return Err(ManiaError::MalformedChart(format!(
            "beat length must be at least {} ms, got {}",
            MIN_BEAT_LENGTH_MS, beat_length
        )));
    }

    Ok(TempoInfo {
        beats_per_minute: 60_000.0 / beat_length,
        start_time_ms,
    })
}

/// Map a horizontal chart position to a lane index
pub fn lane_for_position(x: i64, num_lanes: usize, playfield_width: u32) -> usize {
    let x = x.clamp(0, playfield_width as i64 - 1) as usize;
    (x * num_lanes / playfield_width as usize).min(num_lanes - 1)
}

/// Read all hit objects (`x,y,time,...`) and merge hits sharing a timestamp
pub fn parse_notes(lines: &[&str], grid: &GridConfig) -> Result<(Vec<NoteEvent>, usize)> {
    let header = find_section(lines, NOTE_SECTION)
        .ok_or_else(|| ManiaError::MalformedChart("no [HitObjects] section".to_string()))?;

    let mut hits: Vec<(f64, usize)> = Vec::new();
    for line in section_body(lines, header) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 3 {
            log::debug!("Skipping short hit object line '{}'", line);
            continue;
        }
        let x = fields[0].parse::<f64>().ok();
        let time_ms = fields[2].parse::<f64>().ok();
        match (x, time_ms) {
            (Some(x), Some(time_ms)) if time_ms.is_finite() => {
                let lane = lane_for_position(x.floor() as i64, grid.num_lanes, grid.playfield_width);
                hits.push((time_ms, lane));
            }
            _ => log::debug!("Skipping unreadable hit object line '{}'", line),
        }
    }

    let hit_count = hits.len();
    // Stable sort keeps the file order of simultaneous hits
    hits.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut notes: Vec<NoteEvent> = Vec::new();
    for (time_ms, lane) in hits {
        match notes.last_mut() {
            Some(last) if last.time_ms == time_ms => last.lane_flags[lane] = true,
            _ => {
                let mut lane_flags = vec![false; grid.num_lanes];
                lane_flags[lane] = true;
                notes.push(NoteEvent { time_ms, lane_flags });
            }
        }
    }

    Ok((notes, hit_count))
}

/// Read `Mode` and `CircleSize` from the chart header sections
pub fn parse_metadata(lines: &[&str]) -> ChartMetadata {
    let mut metadata = ChartMetadata::default();
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Mode" => metadata.mode = value.trim().parse().ok(),
            "CircleSize" => {
                metadata.key_count = value.trim().parse::<f64>().ok().map(|v| v.round() as u32)
            }
            _ => {}
        }
    }
    metadata
}

/// Parse the full textual contents of a chart
pub fn parse_chart(contents: &str, grid: &GridConfig) -> Result<ParsedChart> {
    let lines: Vec<&str> = contents.lines().collect();
    let tempo = parse_tempo(&lines)?;
    let (notes, hit_count) = parse_notes(&lines, grid)?;
    let metadata = parse_metadata(&lines);

    Ok(ParsedChart {
        tempo,
        notes,
        metadata,
        hit_count,
    })
}

/// Load and parse a chart file
pub fn load_chart<P: AsRef<Path>>(path: P, grid: &GridConfig) -> Result<ParsedChart> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ManiaError::MalformedChart(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_chart(&contents, grid).map_err(|e| match e {
        ManiaError::MalformedChart(msg) => {
            ManiaError::MalformedChart(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Difficulty classification used to partition the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DifficultyBucket {
    ZeroToOne,
    OneToTwo,
    TwoToThree,
    ThreeToFour,
    FourToFive,
    FivePlus,
    Unrated,
}

impl DifficultyBucket {
    pub fn from_star_rating(rating: f64) -> Self {
        if rating < 1.0 {
            DifficultyBucket::ZeroToOne
        } else if rating < 2.0 {
            DifficultyBucket::OneToTwo
        } else if rating < 3.0 {
            DifficultyBucket::TwoToThree
        } else if rating < 4.0 {
            DifficultyBucket::ThreeToFour
        } else if rating < 5.0 {
            DifficultyBucket::FourToFive
        } else {
            DifficultyBucket::FivePlus
        }
    }

    /// Directory and file-name label
    pub fn label(&self) -> &'static str {
        match self {
            DifficultyBucket::ZeroToOne => "0-1_stars",
            DifficultyBucket::OneToTwo => "1-2_stars",
            DifficultyBucket::TwoToThree => "2-3_stars",
            DifficultyBucket::ThreeToFour => "3-4_stars",
            DifficultyBucket::FourToFive => "4-5_stars",
            DifficultyBucket::FivePlus => "5_stars_plus",
            DifficultyBucket::Unrated => "unrated",
        }
    }
}

/// Metadata sidecar stored next to a chart (`bm_<id>.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartSidecar {
    #[serde(rename = "DifficultyRating")]
    pub difficulty_rating: Option<f64>,
    #[serde(rename = "CS")]
    pub circle_size: Option<f64>,
    #[serde(rename = "Mode")]
    pub mode: Option<u32>,
}

impl ChartSidecar {
    pub fn bucket(&self) -> DifficultyBucket {
        self.difficulty_rating
            .map(DifficultyBucket::from_star_rating)
            .unwrap_or(DifficultyBucket::Unrated)
    }

    /// Sidecar values take precedence over the chart header
    pub fn apply_to(&self, metadata: &mut ChartMetadata) {
        if let Some(mode) = self.mode {
            metadata.mode = Some(mode);
        }
        if let Some(cs) = self.circle_size {
            metadata.key_count = Some(cs.round() as u32);
        }
    }
}

/// Load the sidecar for a chart if one exists
pub fn load_sidecar<P: AsRef<Path>>(chart_path: P) -> Result<Option<ChartSidecar>> {
    let sidecar_path = chart_path.as_ref().with_extension("json");
    if !sidecar_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&sidecar_path)?;
    let sidecar = serde_json::from_str(&content).map_err(|e| {
        ManiaError::MalformedChart(format!(
            "unreadable sidecar {}: {}",
            sidecar_path.display(),
            e
        ))
    })?;
    Ok(Some(sidecar))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_for_position() {
        assert_eq!(lane_for_position(64, 4, 512), 0);
        assert_eq!(lane_for_position(192, 4, 512), 1);
        assert_eq!(lane_for_position(320, 4, 512), 2);
        assert_eq!(lane_for_position(448, 4, 512), 3);
        assert_eq!(lane_for_position(600, 4, 512), 3);
        assert_eq!(lane_for_position(-5, 4, 512), 0);
    }

    #[test]
    fn test_bucket_labels() {
        assert_eq!(DifficultyBucket::from_star_rating(0.5).label(), "0-1_stars");
        assert_eq!(DifficultyBucket::from_star_rating(3.0).label(), "3-4_stars");
        assert_eq!(DifficultyBucket::from_star_rating(7.2).label(), "5_stars_plus");
    }

    #[test]
    fn test_metadata_layout() {
        let lines = ["[General]", "Mode: 3", "[Difficulty]", "CircleSize:4"];
        let metadata = parse_metadata(&lines);
        assert!(metadata.matches_layout(4));
        assert!(!metadata.matches_layout(7));
    }
}
