//! Shared fixtures: small datasets written to a temporary root
//!
//! Data files are real Parquet, clips are minimal MP4 box sequences, and
//! metadata logs follow the recorder's format.

#![allow(dead_code)]

use arrow::array::{Array, Float32Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use episode_db::config::DatasetConfig;
use episode_db::storage::ChunkedEpisodeStore;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Frames per fixture episode: `10 + index`
pub fn frames_of(episode: u64) -> u64 {
    10 + episode
}

/// One dataset under a temporary directory
pub struct DatasetFixture {
    dir: TempDir,
    capacity: u64,
    cameras: Vec<String>,
}

impl DatasetFixture {
    /// Empty dataset with these cameras and chunk capacity
    pub fn new(cameras: &[&str], capacity: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("dataset/meta")).unwrap();
        Self {
            dir,
            capacity,
            cameras: cameras.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// `episodes` recorded episodes, every clip valid, plus `info.json`
    pub fn with_episodes(cameras: &[&str], capacity: u64, episodes: u64) -> Self {
        let fixture = Self::new(cameras, capacity);
        for episode in 0..episodes {
            fixture.add_episode(episode);
        }
        fixture.write_info(episodes);
        fixture
    }

    /// Dataset root
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("dataset")
    }

    /// A sibling directory for curation output (not created)
    pub fn target(&self) -> PathBuf {
        self.dir.path().join("curated")
    }

    /// Open the dataset with default settings
    pub fn store(&self) -> ChunkedEpisodeStore {
        self.store_with(DatasetConfig::builder().root(self.root()))
    }

    /// Open the dataset with a customized builder
    pub fn store_with(&self, builder: episode_db::config::DatasetConfigBuilder) -> ChunkedEpisodeStore {
        ChunkedEpisodeStore::open(builder.build().unwrap()).unwrap()
    }

    /// `data/chunk-###/episode-######.parquet`
    pub fn data_path(&self, episode: u64) -> PathBuf {
        data_path(&self.root(), self.capacity, episode)
    }

    /// `videos/chunk-###/<camera>/episode-######.mp4`
    pub fn video_path(&self, camera: &str, episode: u64) -> PathBuf {
        video_path(&self.root(), self.capacity, camera, episode)
    }

    /// Write every artifact and log line of one episode
    pub fn add_episode(&self, episode: u64) {
        let frames = frames_of(episode);
        write_parquet(&self.data_path(episode), episode, frames);
        for camera in &self.cameras {
            write_file(&self.video_path(camera, episode), &valid_clip());
        }
        append_line(
            &self.root().join("meta/episodes.jsonl"),
            &json!({"episode_index": episode, "tasks": ["pick the cube"], "length": frames}),
        );
        append_line(
            &self.root().join("meta/episodes_stats.jsonl"),
            &json!({"episode_index": episode, "stats": episode_stats(episode, frames)}),
        );
    }

    /// Replace one camera's clip of `episode` with a truncated one
    pub fn corrupt(&self, episode: u64, camera: &str) {
        write_file(&self.video_path(camera, episode), &corrupted_clip());
    }

    /// Write `meta/info.json` describing `episodes` episodes
    pub fn write_info(&self, episodes: u64) {
        let frames: u64 = (0..episodes).map(frames_of).sum();
        let info = json!({
            "codebase_version": "v2.1",
            "robot_type": "so100",
            "total_episodes": episodes,
            "total_frames": frames,
            "total_videos": episodes * self.cameras.len() as u64,
            "total_chunks": episodes.div_ceil(self.capacity),
            "chunks_size": self.capacity,
            "fps": 30,
            "splits": {"train": format!("0:{episodes}")},
        });
        write_file(
            &self.root().join("meta/info.json"),
            serde_json::to_string_pretty(&info).unwrap().as_bytes(),
        );
    }
}

/// Per-episode stats as a recorder writes them
pub fn episode_stats(episode: u64, frames: u64) -> Value {
    let mean = episode as f64;
    json!({
        "action": {
            "min": [mean - 1.0, 0.0],
            "max": [mean + 1.0, 0.0],
            "mean": [mean, 0.0],
            "std": [1.0, 0.0],
            "count": [frames],
        },
        "observation.images.top": {
            "min": [[[0.0]], [[0.0]], [[0.0]]],
            "max": [[[1.0]], [[1.0]], [[1.0]]],
            "mean": [[[0.5]], [[0.5]], [[0.5]]],
            "std": [[[0.2]], [[0.2]], [[0.2]]],
            "count": [frames],
        },
    })
}

pub fn data_path(root: &Path, capacity: u64, episode: u64) -> PathBuf {
    root.join(format!("data/chunk-{:03}/episode-{episode:06}.parquet", episode / capacity))
}

pub fn video_path(root: &Path, capacity: u64, camera: &str, episode: u64) -> PathBuf {
    root.join(format!(
        "videos/chunk-{:03}/{camera}/episode-{episode:06}.mp4",
        episode / capacity
    ))
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

pub fn append_line(path: &Path, record: &Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
    writeln!(file, "{record}").unwrap();
}

fn mp4_box(kind: &[u8; 4], payload_len: usize) -> Vec<u8> {
    let mut out = u32::try_from(8 + payload_len).unwrap().to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.resize(8 + payload_len, 0);
    out
}

/// `ftyp`, `moov`, `mdat`
pub fn valid_clip() -> Vec<u8> {
    let mut bytes = mp4_box(b"ftyp", 16);
    bytes.extend(mp4_box(b"moov", 40));
    bytes.extend(mp4_box(b"mdat", 200));
    bytes
}

/// A clip whose `mdat` was cut short
pub fn corrupted_clip() -> Vec<u8> {
    let mut bytes = valid_clip();
    bytes.truncate(bytes.len() - 50);
    bytes
}

/// Parquet episode file with `frame_index`, `episode_index` and `action`
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
pub fn write_parquet(path: &Path, episode: u64, frames: u64) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("frame_index", DataType::Int64, false),
        Field::new("episode_index", DataType::Int64, false),
        Field::new("action", DataType::Float32, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(0..frames as i64)),
            Arc::new(Int64Array::from(vec![episode as i64; frames as usize])),
            Arc::new(Float32Array::from_iter_values((0..frames).map(|i| i as f32))),
        ],
    )
    .unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

/// Every value of the `episode_index` column
pub fn episode_index_column(path: &Path) -> Vec<i64> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap();
    let mut out = Vec::new();
    for batch in reader {
        let batch = batch.unwrap();
        let column = batch
            .column_by_name("episode_index")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        out.extend((0..column.len()).map(|i| column.value(i)));
    }
    out
}

/// Parsed lines of a JSONL log
pub fn read_lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

/// Every file under `dir`, recursively
pub fn all_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(all_files(&path));
        } else {
            out.push(path);
        }
    }
    out.sort();
    out
}
