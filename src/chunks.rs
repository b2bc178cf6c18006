//! Size-bounded `.npy` chunk files and the per-bucket sequence corpus writer

use crate::error::{ManiaError, Result};
use crate::windowing::Split;
use ndarray::{ArrayView2, ArrayView3};
use ndarray_npy::WriteNpyExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Name of the per-bucket commit journal
pub const MANIFEST_FILE: &str = "processed.txt";

/// Extension of a chunk still being written
const PART_EXTENSION: &str = "npy.part";

/// `{bucket}_{split}_sequences_{index}.npy`
pub fn chunk_file_name(bucket: &str, split: &str, index: usize) -> String {
    format!("{}_{}_sequences_{}.npy", bucket, split, index)
}

fn parse_chunk_index(file_name: &str, bucket: &str, split: &str) -> Option<usize> {
    let prefix = format!("{}_{}_sequences_", bucket, split);
    file_name
        .strip_prefix(&prefix)?
        .strip_suffix(".npy")?
        .parse()
        .ok()
}

/// Chunk files of one bucket/split in `dir`, ordered by chunk index
pub fn chunk_files<P: AsRef<Path>>(dir: P, bucket: &str, split: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut indexed: Vec<(usize, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            parse_chunk_index(name, bucket, split).map(|idx| (idx, path.clone()))
        })
        .collect();
    indexed.sort_by_key(|(idx, _)| *idx);
    Ok(indexed.into_iter().map(|(_, path)| path).collect())
}

/// Index the next chunk of a bucket/split should use
pub fn next_chunk_index<P: AsRef<Path>>(dir: P, bucket: &str, split: &str) -> Result<usize> {
    let files = chunk_files(dir, bucket, split)?;
    Ok(files
        .last()
        .and_then(|p| p.file_name()?.to_str())
        .and_then(|name| parse_chunk_index(name, bucket, split))
        .map_or(0, |idx| idx + 1))
}

/// Buffers windows of one bucket/split and writes them as numbered chunks
#[derive(Debug)]
pub struct ChunkWriter {
    dir: PathBuf,
    bucket: String,
    split: Split,
    window_len: usize,
    row_width: usize,
    max_bytes: u64,
    buffer: Vec<f32>,
    buffered_windows: usize,
    next_index: usize,
    written: Vec<PathBuf>,
    total_windows: usize,
}

impl ChunkWriter {
    pub fn new<P: AsRef<Path>>(
        dir: P,
        bucket: &str,
        split: Split,
        window_len: usize,
        row_width: usize,
        max_bytes: u64,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let next_index = next_chunk_index(&dir, bucket, split.label())?;
        Ok(Self {
            dir,
            bucket: bucket.to_string(),
            split,
            window_len,
            row_width,
            max_bytes: max_bytes.max(1),
            buffer: Vec::new(),
            buffered_windows: 0,
            next_index,
            written: Vec::new(),
            total_windows: 0,
        })
    }

    /// Uncompressed payload of one window
    pub fn window_bytes(&self) -> u64 {
        (self.window_len * self.row_width * std::mem::size_of::<f32>()) as u64
    }

    pub fn buffered_windows(&self) -> usize {
        self.buffered_windows
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_windows as u64 * self.window_bytes()
    }

    pub fn total_windows(&self) -> usize {
        self.total_windows
    }

    pub fn written_files(&self) -> &[PathBuf] {
        &self.written
    }

    /// Byte budget reached; the next flush should happen
    pub fn is_full(&self) -> bool {
        self.buffered_bytes() >= self.max_bytes
    }

    /// Buffer a window without flushing
    pub fn append(&mut self, window: ArrayView2<f32>) -> Result<()> {
        if window.dim() != (self.window_len, self.row_width) {
            return Err(ManiaError::ShapeMismatch(format!(
                "window shape {:?}, chunk expects ({}, {})",
                window.dim(),
                self.window_len,
                self.row_width
            )));
        }
        self.buffer.extend(window.iter().copied());
        self.buffered_windows += 1;
        self.total_windows += 1;
        Ok(())
    }

    /// Add a window; returns true when the byte budget forced a flush
    pub fn push(&mut self, window: ArrayView2<f32>) -> Result<bool> {
        self.append(window)?;
        if self.is_full() {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Write buffered windows to a new chunk file
    ///
    /// The buffer is only cleared once the chunk is on disk, so a failed
    /// write leaves the writer unchanged.
    pub fn flush(&mut self) -> Result<Option<PathBuf>> {
        if self.buffered_windows == 0 {
            return Ok(None);
        }

        let array = ArrayView3::from_shape(
            (self.buffered_windows, self.window_len, self.row_width),
            &self.buffer[..],
        )?;

        let mut path = self.dir.join(chunk_file_name(&self.bucket, self.split.label(), self.next_index));
        while path.exists() {
            self.next_index += 1;
            path = self.dir.join(chunk_file_name(&self.bucket, self.split.label(), self.next_index));
        }

        let tmp_path = path.with_extension(PART_EXTENSION);
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            array.write_npy(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, &path)?;

        log::info!(
            "Wrote {} ({} windows, {:.1} MiB)",
            path.display(),
            self.buffered_windows,
            self.buffered_bytes() as f64 / (1024.0 * 1024.0)
        );

        self.buffer.clear();
        self.buffered_windows = 0;
        self.next_index += 1;
        self.written.push(path.clone());
        Ok(Some(path))
    }
}

/// Totals of one bucket's corpus run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusSummary {
    pub bucket: String,
    pub charts: usize,
    pub train_windows: usize,
    pub test_windows: usize,
    pub files: Vec<PathBuf>,
}

/// Committed state of a bucket's corpus, read back from its manifest
///
/// The manifest is an append-only journal of blocks:
///
/// ```text
/// chunk train/<bucket>_train_sequences_3.npy
/// chunk test/<bucket>_test_sequences_1.npy
/// chart bm_101
/// chart bm_102
/// commit
/// ```
///
/// A block only counts once its `commit` line is present. Chunk files of
/// the bucket that no committed block names come from an interrupted run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusManifest {
    pub charts: HashSet<String>,
    /// `<split>/<file name>` of every committed chunk
    pub chunks: HashSet<String>,
}

impl CorpusManifest {
    pub fn contains_chunk(&self, split: Split, file_name: &str) -> bool {
        self.chunks.contains(&chunk_key(split, file_name))
    }
}

fn chunk_key(split: Split, file_name: &str) -> String {
    format!("{}/{}", split.label(), file_name)
}

/// Committed charts and chunks of a manifest; a missing file is empty
pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<CorpusManifest> {
    let path = path.as_ref();
    let mut manifest = CorpusManifest::default();
    if !path.exists() {
        return Ok(manifest);
    }

    let mut block_charts = Vec::new();
    let mut block_chunks = Vec::new();
    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line == "commit" {
            manifest.charts.extend(block_charts.drain(..));
            manifest.chunks.extend(block_chunks.drain(..));
        } else if let Some(id) = line.strip_prefix("chart ") {
            block_charts.push(id.trim().to_string());
        } else if let Some(key) = line.strip_prefix("chunk ") {
            block_chunks.push(key.trim().to_string());
        } else if !line.is_empty() {
            log::warn!("{}: ignoring manifest line '{}'", path.display(), line);
        }
    }
    if !block_charts.is_empty() || !block_chunks.is_empty() {
        log::warn!(
            "{}: discarding an uncommitted block ({} charts, {} chunks)",
            path.display(),
            block_charts.len(),
            block_chunks.len()
        );
    }
    Ok(manifest)
}

/// Remove chunk files and partial writes that no committed block names
fn discard_uncommitted(
    dir: &Path,
    bucket: &str,
    split: Split,
    manifest: &CorpusManifest,
) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let prefix = format!("{}_{}_sequences_", bucket, split.label());
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let partial = name.starts_with(&prefix) && name.ends_with(&format!(".{}", PART_EXTENSION));
        let orphan = parse_chunk_index(name, bucket, split.label()).is_some()
            && !manifest.contains_chunk(split, name);
        if partial || orphan {
            log::warn!("Removing uncommitted chunk {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Train and test chunk writers of one bucket plus its resume manifest
///
/// Chunks still flush whenever a split reaches its byte budget. At the next
/// chart boundary both splits are flushed and one manifest block names the
/// new chunk files together with the charts they complete. Reopening a
/// bucket deletes chunk files outside any committed block, so a chart is
/// either fully present in both splits or rewritten from scratch.
#[derive(Debug)]
pub struct BucketCorpusWriter {
    bucket: String,
    manifest_path: PathBuf,
    processed: HashSet<String>,
    train: ChunkWriter,
    test: ChunkWriter,
    /// Finished charts not yet named by a committed block
    pending: Vec<String>,
    /// Per split, how many of the writer's files are already committed
    committed_files: [usize; 2],
    charts: usize,
}

impl BucketCorpusWriter {
    pub fn new<P: AsRef<Path>>(
        sequences_root: P,
        bucket: &str,
        window_len: usize,
        row_width: usize,
        max_bytes: u64,
    ) -> Result<Self> {
        let bucket_dir = sequences_root.as_ref().join(bucket);
        let manifest_path = bucket_dir.join(MANIFEST_FILE);
        let manifest = read_manifest(&manifest_path)?;
        for split in Split::all() {
            discard_uncommitted(&bucket_dir.join(split.label()), bucket, split, &manifest)?;
        }

        let writer = |split: Split| {
            ChunkWriter::new(
                bucket_dir.join(split.label()),
                bucket,
                split,
                window_len,
                row_width,
                max_bytes,
            )
        };

        Ok(Self {
            bucket: bucket.to_string(),
            manifest_path,
            processed: manifest.charts,
            train: writer(Split::Train)?,
            test: writer(Split::Test)?,
            pending: Vec::new(),
            committed_files: [0; 2],
            charts: 0,
        })
    }

    pub fn is_processed(&self, chart_id: &str) -> bool {
        self.processed.contains(chart_id)
    }

    fn writer_mut(&mut self, split: Split) -> &mut ChunkWriter {
        match split {
            Split::Train => &mut self.train,
            Split::Test => &mut self.test,
        }
    }

    pub fn push(&mut self, split: Split, window: ArrayView2<f32>) -> Result<()> {
        self.writer_mut(split).push(window)?;
        Ok(())
    }

    fn has_uncommitted_files(&self) -> bool {
        self.train.written_files().len() > self.committed_files[0]
            || self.test.written_files().len() > self.committed_files[1]
    }

    /// Close the current chart; commits if a chunk was written since the last block
    pub fn finish_chart(&mut self, chart_id: &str) -> Result<()> {
        self.pending.push(chart_id.to_string());
        self.charts += 1;
        if self.has_uncommitted_files() {
            self.commit()?;
        }
        Ok(())
    }

    /// Flush both splits and append one manifest block for the finished charts
    fn commit(&mut self) -> Result<()> {
        let mut block = String::new();
        for (slot, split) in Split::all().into_iter().enumerate() {
            let already = self.committed_files[slot];
            let writer = self.writer_mut(split);
            writer.flush()?;
            let written = writer.written_files();
            let total = written.len();
            for path in &written[already..] {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                block.push_str(&format!("chunk {}\n", chunk_key(split, name)));
            }
            self.committed_files[slot] = total;
        }
        if block.is_empty() && self.pending.is_empty() {
            return Ok(());
        }
        for id in &self.pending {
            block.push_str(&format!("chart {}\n", id));
        }
        block.push_str("commit\n");

        let mut manifest = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.manifest_path)?;
        manifest.write_all(block.as_bytes())?;
        manifest.sync_data()?;

        log::debug!("{}: committed {} charts", self.bucket, self.pending.len());
        self.processed.extend(self.pending.drain(..));
        Ok(())
    }

    /// Commit whatever is buffered and return the run totals
    pub fn finish(mut self) -> Result<CorpusSummary> {
        self.commit()?;

        let mut files = self.train.written_files().to_vec();
        files.extend_from_slice(self.test.written_files());
        Ok(CorpusSummary {
            bucket: self.bucket,
            charts: self.charts,
            train_windows: self.train.total_windows(),
            test_windows: self.test.total_windows(),
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_file_name_round_trip() {
        let name = chunk_file_name("2-3_stars", "train", 7);
        assert_eq!(name, "2-3_stars_train_sequences_7.npy");
        assert_eq!(parse_chunk_index(&name, "2-3_stars", "train"), Some(7));
        assert_eq!(parse_chunk_index(&name, "2-3_stars", "test"), None);
        assert_eq!(parse_chunk_index("2-3_stars_train_sequences_7.npy.part", "2-3_stars", "train"), None);
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("maniagen_chunks_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_manifest_ignores_unterminated_block() {
        let dir = scratch_dir("journal");
        let path = dir.join(MANIFEST_FILE);
        fs::write(
            &path,
            "chunk train/b_train_sequences_0.npy\nchart bm_1\ncommit\nchunk train/b_train_sequences_1.npy\nchart bm_2\n",
        )
        .unwrap();

        let manifest = read_manifest(&path).unwrap();
        assert!(manifest.charts.contains("bm_1"));
        assert!(!manifest.charts.contains("bm_2"));
        assert!(manifest.contains_chunk(Split::Train, "b_train_sequences_0.npy"));
        assert!(!manifest.contains_chunk(Split::Train, "b_train_sequences_1.npy"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_flush_keeps_buffer() {
        let dir = scratch_dir("flush_fail").join("train");
        let mut writer = ChunkWriter::new(&dir, "b", Split::Train, 2, 3, 1 << 20).unwrap();
        let window = ndarray::Array2::<f32>::ones((2, 3));
        writer.append(window.view()).unwrap();

        fs::remove_dir_all(&dir).unwrap();
        assert!(writer.flush().is_err());
        assert_eq!(writer.buffered_windows(), 1);

        fs::create_dir_all(&dir).unwrap();
        let path = writer.flush().unwrap().unwrap();
        assert_eq!(writer.buffered_windows(), 0);
        assert_eq!(crate::stats::read_chunk(&path).unwrap().dim(), (1, 2, 3));

        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
    }
}
