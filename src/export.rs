//! `.gblf` prediction files and chart text rendering for decoded events

use crate::chart::TempoInfo;
use crate::config::GridConfig;
use crate::decoder::DecodedNoteEvent;
use crate::error::{ManiaError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

/// `time|flag:prob|flag:prob|...` with integer milliseconds and 3-decimal probabilities
pub fn format_gblf_line(event: &DecodedNoteEvent) -> String {
    let mut line = format!("{}", event.time_ms.trunc() as i64);
    for (flag, prob) in event.per_lane_flag.iter().zip(&event.per_lane_probability) {
        line.push_str(&format!("|{}:{:.3}", *flag as u8, prob));
    }
    line
}

/// All events as `.gblf` text, one newline-terminated line per subbeat
pub fn render_gblf(events: &[DecodedNoteEvent]) -> String {
    let mut contents = String::new();
    for event in events {
        contents.push_str(&format_gblf_line(event));
        contents.push('\n');
    }
    contents
}

fn overwrite_error(path: &Path) -> ManiaError {
    ManiaError::InputValidationError(format!("refusing to overwrite {}", path.display()))
}

/// Fail if `path` already exists; exported files are never replaced
pub fn ensure_absent<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Err(overwrite_error(path));
    }
    Ok(())
}

/// Create a new output file, refusing to replace an existing one
fn create_output(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => overwrite_error(path),
            _ => e.into(),
        })
}

/// Write events as `.gblf`, refusing to replace an existing file
pub fn write_gblf<P: AsRef<Path>>(path: P, events: &[DecodedNoteEvent]) -> Result<()> {
    let mut writer = BufWriter::new(create_output(path.as_ref())?);
    for event in events {
        writeln!(writer, "{}", format_gblf_line(event))?;
    }
    writer.flush()?;
    Ok(())
}

fn gblf_error(line: &str, what: &str) -> ManiaError {
    ManiaError::InputValidationError(format!("bad .gblf line '{}': {}", line, what))
}

/// Parse one `.gblf` line; `subbeat_index` is its position in the file
pub fn parse_gblf_line(line: &str, subbeat_index: usize) -> Result<DecodedNoteEvent> {
    let mut parts = line.trim().split('|');
    let time_ms = parts
        .next()
        .and_then(|t| t.trim().parse::<f64>().ok())
        .ok_or_else(|| gblf_error(line, "unreadable timestamp"))?;

    let mut per_lane_flag = Vec::new();
    let mut per_lane_probability = Vec::new();
    for cell in parts {
        let (flag, prob) = cell
            .split_once(':')
            .ok_or_else(|| gblf_error(line, "lane cell without ':'"))?;
        per_lane_flag.push(match flag.trim() {
            "1" => true,
            "0" => false,
            _ => return Err(gblf_error(line, "lane flag must be 0 or 1")),
        });
        per_lane_probability.push(
            prob.trim()
                .parse::<f32>()
                .map_err(|_| gblf_error(line, "unreadable probability"))?,
        );
    }

    if per_lane_flag.is_empty() {
        return Err(gblf_error(line, "no lane cells"));
    }

    Ok(DecodedNoteEvent {
        subbeat_index,
        time_ms,
        per_lane_flag,
        per_lane_probability,
    })
}

pub fn read_gblf<P: AsRef<Path>>(path: P) -> Result<Vec<DecodedNoteEvent>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let index = events.len();
        events.push(parse_gblf_line(&line, index)?);
    }
    Ok(events)
}

/// Centre of `lane` on the playfield
pub fn lane_x_position(lane: usize, num_lanes: usize, playfield_width: u32) -> u32 {
    ((lane as f64 + 0.5) * playfield_width as f64 / num_lanes.max(1) as f64).floor() as u32
}

/// One hit-object line per active lane of every event
pub fn render_hit_objects(events: &[DecodedNoteEvent], grid: &GridConfig) -> Vec<String> {
    events
        .iter()
        .flat_map(|event| {
            let time = event.time_ms.trunc() as i64;
            event.active_lanes().map(move |lane| {
                format!(
                    "{},192,{},1,0,0:0:0:0:",
                    lane_x_position(lane, grid.num_lanes, grid.playfield_width),
                    time
                )
            })
        })
        .collect()
}

/// Header fields of an exported chart
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartTemplate {
    pub title: String,
    pub artist: String,
    pub difficulty_name: String,
    pub audio_file_name: String,
    pub time_signature: u32,
}

impl Default for ChartTemplate {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            artist: "Unknown".to_string(),
            difficulty_name: "Generated".to_string(),
            audio_file_name: "audio.wav".to_string(),
            time_signature: 4,
        }
    }
}

/// Minimal chart text with one timing point and the decoded hit objects
pub fn render_chart_text(
    events: &[DecodedNoteEvent],
    tempo: &TempoInfo,
    template: &ChartTemplate,
    grid: &GridConfig,
) -> String {
    let mut text = String::from("osu file format v14\n\n");

    text.push_str("[General]\n");
    text.push_str(&format!("AudioFilename: {}\n", template.audio_file_name));
    text.push_str("AudioLeadIn: 0\n");
    text.push_str("PreviewTime: -1\n");
    text.push_str(&format!("Mode: {}\n\n", crate::chart::MANIA_MODE));

    text.push_str("[Metadata]\n");
    text.push_str(&format!("Title:{}\n", template.title));
    text.push_str(&format!("Artist:{}\n", template.artist));
    text.push_str(&format!("Version:{}\n\n", template.difficulty_name));

    text.push_str("[Difficulty]\n");
    text.push_str(&format!("CircleSize:{}\n", grid.num_lanes));
    text.push_str("OverallDifficulty:8\n\n");

    text.push_str("[TimingPoints]\n");
    text.push_str(&format!(
        "{},{},{},0,0,100,1,0\n\n",
        tempo.start_time_ms.trunc() as i64,
        tempo.beat_ms(),
        template.time_signature
    ));

    text.push_str("[HitObjects]\n");
    for line in render_hit_objects(events, grid) {
        text.push_str(&line);
        text.push('\n');
    }
    text
}

/// Write a chart file, refusing to replace an existing one
pub fn write_chart<P: AsRef<Path>>(path: P, contents: &str) -> Result<()> {
    let mut file = create_output(path.as_ref())?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(time_ms: f64, flags: &[bool], probs: &[f32]) -> DecodedNoteEvent {
        DecodedNoteEvent {
            subbeat_index: 0,
            time_ms,
            per_lane_flag: flags.to_vec(),
            per_lane_probability: probs.to_vec(),
        }
    }

    #[test]
    fn test_gblf_line_format() {
        let e = event(125.9, &[true, false, false, true], &[0.9, 0.1234, 0.0, 0.5]);
        assert_eq!(format_gblf_line(&e), "125|1:0.900|0:0.123|0:0.000|1:0.500");
    }

    #[test]
    fn test_parse_gblf_line() {
        let parsed = parse_gblf_line("250|0:0.010|1:0.870", 2).unwrap();
        assert_eq!(parsed.subbeat_index, 2);
        assert_eq!(parsed.time_ms, 250.0);
        assert_eq!(parsed.per_lane_flag, vec![false, true]);
        assert!((parsed.per_lane_probability[1] - 0.87).abs() < 1e-6);
        assert!(parse_gblf_line("250|2:0.1", 0).is_err());
        assert!(parse_gblf_line("abc|1:0.1", 0).is_err());
    }

    #[test]
    fn test_lane_x_positions() {
        let xs: Vec<u32> = (0..4).map(|lane| lane_x_position(lane, 4, 512)).collect();
        assert_eq!(xs, vec![64, 192, 320, 448]);
    }
}
