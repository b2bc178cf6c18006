//! Sequence windowing, split assignment and chunk writing

use maniagen::align::AlignedRecord;
use maniagen::chunks::{self, BucketCorpusWriter, ChunkWriter};
use maniagen::config::{SplitMode, WindowConfig};
use maniagen::stats;
use maniagen::windowing::{self, Split, SplitAssigner};
use std::path::PathBuf;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("maniagen_windows_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Records whose feature values encode their position
fn generate_records(n: usize) -> Vec<AlignedRecord> {
    (0..n)
        .map(|i| AlignedRecord {
            subbeat_index: i,
            cepstral: vec![i as f32; 5],
            onset_strength: i as f32 * 0.5,
            energy: 1.0,
            lane_flags: vec![i % 4 == 0, i % 4 == 1, i % 4 == 2, i % 4 == 3],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_count_and_contents() {
        let records = generate_records(20);
        let windows = windowing::build_windows(&records, 5, 1);

        assert_eq!(windows.len(), 15);
        for (i, window) in windows.iter().enumerate() {
            assert_eq!(window.start, i);
            assert_eq!(window.len(), 5);
            assert_eq!(window.records, records[i..i + 5].to_vec());
        }
    }

    #[test]
    fn test_short_stream_has_no_windows() {
        let records = generate_records(5);
        assert!(windowing::build_windows(&records, 5, 1).is_empty());
        assert!(windowing::build_windows(&records, 8, 1).is_empty());
    }

    #[test]
    fn test_stride() {
        let records = generate_records(20);
        let starts: Vec<usize> = windowing::build_windows(&records, 5, 4)
            .iter()
            .map(|w| w.start)
            .collect();
        assert_eq!(starts, vec![0, 4, 8, 12]);
    }

    #[test]
    fn test_window_matrix_layout() {
        let records = generate_records(3);
        let matrix = windowing::record_matrix(&records).unwrap();
        assert_eq!(matrix.dim(), (3, 11));
        assert_eq!(matrix.row(2).to_vec(), vec![2.0, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_split_is_reproducible() {
        let config = WindowConfig::default();
        let assigner = SplitAssigner::new(&config);
        let first = assigner.assign("bm_101", 500);
        let second = SplitAssigner::new(&config).assign("bm_101", 500);
        assert_eq!(first, second);

        let test_share = first.iter().filter(|&&s| s == Split::Test).count() as f64 / 500.0;
        assert!((test_share - 0.2).abs() < 0.08, "test share {}", test_share);
    }

    #[test]
    fn test_per_chart_split_is_uniform() {
        let config = WindowConfig {
            split_mode: SplitMode::PerChart,
            ..Default::default()
        };
        let assigner = SplitAssigner::new(&config);
        for id in ["bm_1", "bm_2", "bm_3", "bm_4"] {
            let splits = assigner.assign(id, 50);
            assert!(splits.iter().all(|&s| s == splits[0]));
        }
    }

    #[test]
    fn test_extreme_ratios() {
        let all_train = WindowConfig {
            test_ratio: 0.0,
            ..Default::default()
        };
        let all_test = WindowConfig {
            test_ratio: 1.0,
            ..Default::default()
        };
        assert!(SplitAssigner::new(&all_train).assign("x", 100).iter().all(|&s| s == Split::Train));
        assert!(SplitAssigner::new(&all_test).assign("x", 100).iter().all(|&s| s == Split::Test));
    }

    #[test]
    fn test_chunk_writer_flushes_on_budget() {
        let dir = scratch_dir("budget");
        let rows = windowing::record_matrix(&generate_records(10)).unwrap();
        // 2 windows of 4x11 f32 = 352 bytes per chunk
        let mut writer = ChunkWriter::new(&dir, "b", Split::Train, 4, 11, 352).unwrap();

        let mut flushes = 0;
        for start in 0..5 {
            if writer.push(windowing::window_view(&rows, start, 4)).unwrap() {
                flushes += 1;
            }
        }
        assert_eq!(flushes, 2);
        assert_eq!(writer.buffered_windows(), 1);
        writer.flush().unwrap();

        let files = chunks::chunk_files(&dir, "b", "train").unwrap();
        assert_eq!(files.len(), 3);
        let last = stats::read_chunk(&files[2]).unwrap();
        assert_eq!(last.dim(), (1, 4, 11));
        assert_eq!(last[[0, 0, 0]], 4.0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_chunk_indices_continue() {
        let dir = scratch_dir("continue");
        let rows = windowing::record_matrix(&generate_records(6)).unwrap();
        for _ in 0..2 {
            let mut writer = ChunkWriter::new(&dir, "b", Split::Test, 4, 11, 1 << 20).unwrap();
            writer.push(windowing::window_view(&rows, 0, 4)).unwrap();
            writer.flush().unwrap();
        }
        assert!(dir.join("b_test_sequences_0.npy").exists());
        assert!(dir.join("b_test_sequences_1.npy").exists());
        assert_eq!(chunks::next_chunk_index(&dir, "b", "test").unwrap(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_manifest_records_flushed_charts() {
        let root = scratch_dir("manifest");
        let rows = windowing::record_matrix(&generate_records(6)).unwrap();

        let mut writer = BucketCorpusWriter::new(&root, "b", 4, 11, 1 << 20).unwrap();
        writer.push(Split::Train, windowing::window_view(&rows, 0, 4)).unwrap();
        writer.push(Split::Test, windowing::window_view(&rows, 1, 4)).unwrap();
        writer.finish_chart("bm_1").unwrap();
        // Windows are still buffered, so nothing is recorded yet
        let manifest = root.join("b").join(chunks::MANIFEST_FILE);
        assert!(chunks::read_manifest(&manifest).unwrap().charts.is_empty());

        let summary = writer.finish().unwrap();
        assert_eq!(summary.charts, 1);
        assert_eq!(summary.train_windows, 1);
        assert_eq!(summary.test_windows, 1);
        assert_eq!(summary.files.len(), 2);
        assert!(chunks::read_manifest(&manifest).unwrap().charts.contains("bm_1"));

        let reopened = BucketCorpusWriter::new(&root, "b", 4, 11, 1 << 20).unwrap();
        assert!(reopened.is_processed("bm_1"));
        assert!(!reopened.is_processed("bm_2"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    /// Windows of one chart as the sequences stage would push them
    fn push_chart(writer: &mut BucketCorpusWriter, rows: &ndarray::Array2<f32>, splits: &[Split]) {
        for (start, &split) in splits.iter().enumerate() {
            writer.push(split, windowing::window_view(rows, start, 4)).unwrap();
        }
    }

    fn split_windows(root: &std::path::Path, split: &str) -> usize {
        chunks::chunk_files(root.join("b").join(split), "b", split)
            .unwrap()
            .iter()
            .map(|p| stats::read_chunk(p).unwrap().dim().0)
            .sum()
    }

    #[test]
    fn test_chart_crossing_budget_commits_both_splits() {
        let root = scratch_dir("crossing");
        let rows = windowing::record_matrix(&generate_records(8)).unwrap();

        // Budget of 2 windows is reached by train before the test window arrives
        let mut writer = BucketCorpusWriter::new(&root, "b", 4, 11, 352).unwrap();
        push_chart(&mut writer, &rows, &[Split::Train, Split::Train, Split::Test]);
        writer.finish_chart("bm_1").unwrap();
        // Interrupted before finish()
        drop(writer);

        let reopened = BucketCorpusWriter::new(&root, "b", 4, 11, 352).unwrap();
        assert!(reopened.is_processed("bm_1"));
        assert_eq!(split_windows(&root, "train"), 2);
        assert_eq!(split_windows(&root, "test"), 1);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_interrupted_commit_is_rewritten_once() {
        let root = scratch_dir("interrupted");
        let rows = windowing::record_matrix(&generate_records(8)).unwrap();

        // A run that renamed its train chunk and died before the test chunk and manifest
        let mut orphan = ChunkWriter::new(root.join("b").join("train"), "b", Split::Train, 4, 11, 1 << 20).unwrap();
        orphan.push(windowing::window_view(&rows, 0, 4)).unwrap();
        orphan.push(windowing::window_view(&rows, 1, 4)).unwrap();
        orphan.flush().unwrap();
        std::fs::create_dir_all(root.join("b").join("test")).unwrap();
        std::fs::write(root.join("b").join("test").join("b_test_sequences_0.npy.part"), b"partial").unwrap();

        let mut writer = BucketCorpusWriter::new(&root, "b", 4, 11, 352).unwrap();
        assert!(!writer.is_processed("bm_1"));
        assert_eq!(split_windows(&root, "train"), 0);
        assert!(!root.join("b").join("test").join("b_test_sequences_0.npy.part").exists());

        push_chart(&mut writer, &rows, &[Split::Train, Split::Train, Split::Test]);
        writer.finish_chart("bm_1").unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.train_windows, 2);
        assert_eq!(split_windows(&root, "train"), 2);
        assert_eq!(split_windows(&root, "test"), 1);

        // A clean rerun keeps everything
        let rerun = BucketCorpusWriter::new(&root, "b", 4, 11, 352).unwrap();
        assert!(rerun.is_processed("bm_1"));
        assert_eq!(split_windows(&root, "train"), 2);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_unfinished_chart_leaves_nothing_behind() {
        let root = scratch_dir("unfinished");
        let rows = windowing::record_matrix(&generate_records(8)).unwrap();

        let mut writer = BucketCorpusWriter::new(&root, "b", 4, 11, 1 << 20).unwrap();
        push_chart(&mut writer, &rows, &[Split::Train, Split::Test]);
        writer.finish_chart("bm_1").unwrap();
        drop(writer);

        let reopened = BucketCorpusWriter::new(&root, "b", 4, 11, 1 << 20).unwrap();
        assert!(!reopened.is_processed("bm_1"));
        assert_eq!(split_windows(&root, "train") + split_windows(&root, "test"), 0);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
