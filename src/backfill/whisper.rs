//! Read-only access to Whisper round-robin archives.
//!
//! File layout (all integers big-endian):
//!
//! ```text
//! header:        aggregation u32 | max retention u32 | x-files-factor f32 | archive count u32
//! archive info:  offset u32 | seconds per point u32 | points u32          (one per archive)
//! point:         timestamp u32 | value f64
//! ```

use super::{DbReader, Point};
use crate::clock::Clock;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const HEADER_SIZE: usize = 16;
const ARCHIVE_INFO_SIZE: usize = 12;
const POINT_SIZE: usize = 12;
const SUFFIX: &str = "wsp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub offset: u32,
    pub seconds_per_point: u32,
    pub points: u32,
}

impl ArchiveInfo {
    pub fn retention(&self) -> i64 {
        i64::from(self.seconds_per_point) * i64::from(self.points)
    }
}

/// A parsed Whisper file held in memory.
#[derive(Debug, Clone)]
pub struct WhisperFile {
    max_retention: i64,
    archives: Vec<ArchiveInfo>,
    data: Vec<u8>,
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn read_f64(data: &[u8], at: usize) -> Option<f64> {
    let bytes = data.get(at..at + 8)?;
    Some(f64::from_be_bytes(bytes.try_into().ok()?))
}

impl WhisperFile {
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(data).map_err(|e| match e {
            Error::Whisper(msg) => Error::Whisper(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let truncated = || Error::Whisper("file is truncated".to_string());
        if data.len() < HEADER_SIZE {
            return Err(truncated());
        }
        let max_retention = i64::from(read_u32(&data, 4).ok_or_else(truncated)?);
        let archive_count = read_u32(&data, 12).ok_or_else(truncated)? as usize;
        if archive_count == 0 {
            return Err(Error::Whisper("file has no archives".to_string()));
        }

        let infos_end = archive_count
            .checked_mul(ARCHIVE_INFO_SIZE)
            .and_then(|len| len.checked_add(HEADER_SIZE))
            .ok_or_else(truncated)?;
        if infos_end > data.len() {
            return Err(truncated());
        }

        let mut archives = Vec::with_capacity(archive_count);
        for i in 0..archive_count {
            let at = HEADER_SIZE + i * ARCHIVE_INFO_SIZE;
            let info = ArchiveInfo {
                offset: read_u32(&data, at).ok_or_else(truncated)?,
                seconds_per_point: read_u32(&data, at + 4).ok_or_else(truncated)?,
                points: read_u32(&data, at + 8).ok_or_else(truncated)?,
            };
            if info.seconds_per_point == 0 || info.points == 0 {
                return Err(Error::Whisper(format!("archive {} is empty", i)));
            }
            let end = (info.points as usize)
                .checked_mul(POINT_SIZE)
                .and_then(|len| len.checked_add(info.offset as usize))
                .ok_or_else(truncated)?;
            if end > data.len() {
                return Err(truncated());
            }
            archives.push(info);
        }

        Ok(Self {
            max_retention,
            archives,
            data,
        })
    }

    pub fn archives(&self) -> &[ArchiveInfo] {
        &self.archives
    }

    pub fn max_retention(&self) -> i64 {
        self.max_retention
    }

    /// Points with `from < t <= until` (Unix seconds) from the most precise
    /// archive whose retention reaches back to `from`.
    ///
    /// NaN values are skipped; the result is sorted by time.
    pub fn fetch(&self, from: i64, until: i64, now: i64) -> Result<Vec<(i64, f64)>> {
        if from > until {
            return Err(Error::Whisper(format!(
                "invalid time interval: from {} is after until {}",
                from, until
            )));
        }
        let oldest = now - self.max_retention;
        if from > now || until < oldest {
            return Ok(Vec::new());
        }
        let from = from.max(oldest);
        let until = until.min(now);

        let diff = now - from;
        let archive = self
            .archives
            .iter()
            .find(|a| a.retention() >= diff)
            .or_else(|| self.archives.last())
            .ok_or_else(|| Error::Whisper("file has no archives".to_string()))?;

        let step = i64::from(archive.seconds_per_point);
        let from_interval = from - from.rem_euclid(step) + step;
        let mut until_interval = until - until.rem_euclid(step) + step;
        if from_interval == until_interval {
            until_interval += step;
        }

        let mut points = Vec::new();
        for i in 0..archive.points as usize {
            let at = archive.offset as usize + i * POINT_SIZE;
            let (Some(ts), Some(value)) = (read_u32(&self.data, at), read_f64(&self.data, at + 4))
            else {
                continue;
            };
            let ts = i64::from(ts);
            if ts == 0 || ts % step != 0 || value.is_nan() {
                continue;
            }
            if ts >= from_interval && ts < until_interval {
                points.push((ts, value));
            }
        }
        points.sort_by_key(|(ts, _)| *ts);
        points.dedup_by_key(|(ts, _)| *ts);
        Ok(points)
    }
}

/// Builds Whisper files, e.g. for fixtures.
#[derive(Debug, Clone)]
pub struct WhisperBuilder {
    archives: Vec<ArchiveInfo>,
    points: Vec<Vec<(u32, f64)>>,
}

impl WhisperBuilder {
    /// `archives` as `(seconds per point, points)`, most precise first.
    pub fn new(archives: &[(u32, u32)]) -> Self {
        let mut offset = (HEADER_SIZE + archives.len() * ARCHIVE_INFO_SIZE) as u32;
        let infos = archives
            .iter()
            .map(|&(seconds_per_point, points)| {
                let info = ArchiveInfo {
                    offset,
                    seconds_per_point,
                    points,
                };
                offset += points * POINT_SIZE as u32;
                info
            })
            .collect::<Vec<_>>();
        Self {
            points: vec![Vec::new(); infos.len()],
            archives: infos,
        }
    }

    /// Store a point in one archive; the timestamp is aligned down to the
    /// archive's resolution.
    pub fn point(mut self, archive: usize, timestamp: u32, value: f64) -> Self {
        let target = (self.archives.get(archive), self.points.get_mut(archive));
        if let (Some(info), Some(points)) = target {
            points.push((timestamp - timestamp % info.seconds_per_point, value));
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let max_retention = self
            .archives
            .iter()
            .map(|a| a.seconds_per_point * a.points)
            .max()
            .unwrap_or(0);

        let mut out = Vec::new();
        out.extend_from_slice(&1u32.to_be_bytes()); // average
        out.extend_from_slice(&max_retention.to_be_bytes());
        out.extend_from_slice(&0.5f32.to_be_bytes());
        out.extend_from_slice(&(self.archives.len() as u32).to_be_bytes());
        for a in &self.archives {
            out.extend_from_slice(&a.offset.to_be_bytes());
            out.extend_from_slice(&a.seconds_per_point.to_be_bytes());
            out.extend_from_slice(&a.points.to_be_bytes());
        }
        for (info, points) in self.archives.iter().zip(&self.points) {
            let mut slots = vec![(0u32, 0f64); info.points as usize];
            for &(ts, value) in points {
                let slot = (ts / info.seconds_per_point % info.points) as usize;
                slots[slot] = (ts, value);
            }
            for (ts, value) in slots {
                out.extend_from_slice(&ts.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.build())?;
        Ok(())
    }
}

/// [`DbReader`] over a directory tree of `.wsp` files.
///
/// The metric name of a file is its path relative to the root with
/// separators replaced by dots and the suffix removed.
pub struct WhisperReader {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl WhisperReader {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    fn path_for(&self, metric: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in metric.split('.') {
            path.push(segment);
        }
        path.set_extension(SUFFIX);
        path
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.walk(&path, out)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(SUFFIX) {
                continue;
            }
            let stem = path.with_extension("");
            let Ok(relative) = stem.strip_prefix(&self.root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join(".");
            out.push(name);
        }
        Ok(())
    }

    fn now(&self) -> i64 {
        self.clock.now().timestamp()
    }
}

impl DbReader for WhisperReader {
    fn metrics(&self) -> Result<Vec<String>> {
        let mut metrics = Vec::new();
        self.walk(&self.root, &mut metrics)?;
        metrics.sort();
        Ok(metrics)
    }

    fn min_max_timestamps(&self) -> Result<(i64, i64)> {
        let now = self.now();
        let mut bounds: Option<(i64, i64)> = None;
        for metric in self.metrics()? {
            let file = WhisperFile::open(&self.path_for(&metric))?;
            let points = file.fetch(i64::from(i32::MIN), i64::from(i32::MAX), now)?;
            for (ts, _) in points {
                bounds = Some(match bounds {
                    Some((min, max)) => (min.min(ts), max.max(ts)),
                    None => (ts, ts),
                });
            }
        }
        let (min, max) = bounds.ok_or(Error::NoSamples)?;
        debug!(min, max, "Whisper time range");
        Ok((min * 1000, max * 1000))
    }

    fn points(&self, metric: &str, from_ms: i64, until_ms: i64) -> Result<Vec<Point>> {
        let file = WhisperFile::open(&self.path_for(metric))?;
        let points = file.fetch(from_ms.div_euclid(1000), until_ms.div_euclid(1000), self.now())?;
        Ok(points
            .into_iter()
            .map(|(ts, value)| Point {
                timestamp: ts * 1000,
                value,
            })
            .collect())
    }
}

impl std::fmt::Debug for WhisperReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperReader")
            .field("root", &self.root)
            .finish()
    }
}
