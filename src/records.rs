//! Preprocessed record files: one comma-separated row per aligned subbeat

use crate::align::AlignedRecord;
use crate::config::Config;
use crate::error::{ManiaError, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// File extension of preprocessed record files
pub const RECORD_EXTENSION: &str = "csv";

/// Column layout `subbeat_idx, mfcc0..mfccN, onset, rms, lane0..laneM`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSchema {
    pub n_cepstral: usize,
    pub num_lanes: usize,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            n_cepstral: 5,
            num_lanes: 4,
        }
    }
}

impl RecordSchema {
    pub fn from_config(config: &Config) -> Self {
        Self {
            n_cepstral: config.audio.n_mfcc,
            num_lanes: config.grid.num_lanes,
        }
    }

    /// Raw audio feature columns (cepstral + onset + rms)
    pub fn num_features(&self) -> usize {
        self.n_cepstral + 2
    }

    /// Features plus lane labels, the width of a sequence chunk row
    pub fn row_width(&self) -> usize {
        self.num_features() + self.num_lanes
    }

    pub fn num_columns(&self) -> usize {
        1 + self.row_width()
    }

    pub fn header(&self) -> String {
        let mut columns = vec!["subbeat_idx".to_string()];
        columns.extend((0..self.n_cepstral).map(|i| format!("mfcc{}", i)));
        columns.push("onset".to_string());
        columns.push("rms".to_string());
        columns.extend((0..self.num_lanes).map(|i| format!("lane{}", i)));
        columns.join(",")
    }
}

/// Format one record as a row
pub fn format_record(record: &AlignedRecord) -> String {
    let mut line = record.subbeat_index.to_string();
    for value in &record.cepstral {
        line.push_str(&format!(",{:.6}", value));
    }
    line.push_str(&format!(",{:.6},{:.6}", record.onset_strength, record.energy));
    for &flag in &record.lane_flags {
        line.push_str(if flag { ",1" } else { ",0" });
    }
    line
}

/// Write records to `path`; the file appears only once fully written
pub fn write_records<P: AsRef<Path>>(
    path: P,
    records: &[AlignedRecord],
    schema: &RecordSchema,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(first) = records.first() {
        let found = 1 + first.num_features() + first.lane_flags.len();
        if found != schema.num_columns() {
            return Err(ManiaError::ColumnMismatch {
                path: path.to_path_buf(),
                expected: schema.num_columns(),
                found,
            });
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("csv.part");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writeln!(writer, "{}", schema.header())?;
        for record in records {
            writeln!(writer, "{}", format_record(record))?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn parse_value(field: &str, path: &Path, line_no: usize) -> Result<f32> {
    field.trim().parse::<f32>().map_err(|_| {
        ManiaError::RecordFileError(format!(
            "{}:{}: unreadable value '{}'",
            path.display(),
            line_no,
            field
        ))
    })
}

/// Read a record file, validating the column count of every row
pub fn read_records<P: AsRef<Path>>(path: P, schema: &RecordSchema) -> Result<Vec<AlignedRecord>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let expected = schema.num_columns();
    let mut records = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with("subbeat_idx") {
            continue;
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != expected {
            return Err(ManiaError::ColumnMismatch {
                path: path.to_path_buf(),
                expected,
                found: fields.len(),
            });
        }

        let mut values = Vec::with_capacity(expected);
        for field in &fields {
            values.push(parse_value(field, path, line_no + 1)?);
        }

        let features_end = 1 + schema.n_cepstral;
        records.push(AlignedRecord {
            subbeat_index: values[0].max(0.0) as usize,
            cepstral: values[1..features_end].to_vec(),
            onset_strength: values[features_end],
            energy: values[features_end + 1],
            lane_flags: values[features_end + 2..].iter().map(|&v| v != 0.0).collect(),
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_header() {
        let schema = RecordSchema::default();
        assert_eq!(
            schema.header(),
            "subbeat_idx,mfcc0,mfcc1,mfcc2,mfcc3,mfcc4,onset,rms,lane0,lane1,lane2,lane3"
        );
        assert_eq!(schema.num_columns(), 12);
        assert_eq!(schema.row_width(), 11);
    }

    #[test]
    fn test_format_record() {
        let record = AlignedRecord {
            subbeat_index: 3,
            cepstral: vec![1.0, -2.5, 0.0, 0.125, 3.0],
            onset_strength: 0.5,
            energy: 0.25,
            lane_flags: vec![true, false, false, true],
        };
        assert_eq!(
            format_record(&record),
            "3,1.000000,-2.500000,0.000000,0.125000,3.000000,0.500000,0.250000,1,0,0,1"
        );
    }
}
