use anyhow::{Context, Result};
use glob::glob;
use log::debug;
use polars::prelude::*;
use regex::Regex;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::models::{Dataset, MonthKey};

/// Month-partitioned parquet cache of the raw regulation feeds.
///
/// Layout: `<root>/<dataset dir>/<dataset dir>_YYYY_MM.parquet`. Partitions are
/// replaced wholesale and never appended to.
#[derive(Debug, Clone)]
pub struct CacheRepository {
    root: PathBuf,
}

impl CacheRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset: Dataset) -> PathBuf {
        self.root.join(dataset.dir_name())
    }

    pub fn partition_path(&self, dataset: Dataset, month: MonthKey) -> PathBuf {
        self.dataset_dir(dataset).join(format!(
            "{}_{:04}_{:02}.parquet",
            dataset.dir_name(),
            month.year(),
            month.month()
        ))
    }

    pub fn has_partition(&self, dataset: Dataset, month: MonthKey) -> bool {
        self.partition_path(dataset, month).is_file()
    }

    /// `Ok(None)` when the partition has never been written.
    pub fn read_partition(&self, dataset: Dataset, month: MonthKey) -> Result<Option<DataFrame>> {
        let path = self.partition_path(dataset, month);
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let df = ParquetReader::new(file)
            .finish()
            .with_context(|| format!("reading {}", path.display()))?;
        debug!("Read {} rows from {}", df.height(), path.display());
        Ok(Some(df))
    }

    /// Replace a partition. The frame goes to a temporary file in the same
    /// directory first and is renamed into place, so readers never see half a file.
    pub fn write_partition(
        &self,
        dataset: Dataset,
        month: MonthKey,
        df: &mut DataFrame,
    ) -> Result<PathBuf> {
        let dir = self.dataset_dir(dataset);
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = self.partition_path(dataset, month);

        let mut staged = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("staging a partition in {}", dir.display()))?;
        ParquetWriter::new(staged.as_file_mut())
            .finish(df)
            .with_context(|| format!("writing {} {}", dataset, month))?;
        staged
            .persist(&path)
            .with_context(|| format!("moving partition into {}", path.display()))?;
        debug!("Wrote {} rows to {}", df.height(), path.display());
        Ok(path)
    }

    /// Cached partitions of one dataset, oldest first.
    pub fn list_partitions(&self, dataset: Dataset) -> Result<Vec<(MonthKey, PathBuf)>> {
        let pattern = self
            .dataset_dir(dataset)
            .join(format!("{}_*.parquet", dataset.dir_name()));
        let name_re = Regex::new(&format!(
            r"^{}_(\d{{4}})_(\d{{2}})\.parquet$",
            dataset.dir_name()
        ))?;

        let mut partitions = Vec::new();
        for path in glob(&pattern.to_string_lossy())?.filter_map(Result::ok) {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(caps) = name_re.captures(name) else {
                continue;
            };
            let month = caps[1]
                .parse::<i32>()
                .ok()
                .zip(caps[2].parse::<u32>().ok())
                .and_then(|(year, month)| MonthKey::new(year, month));
            if let Some(month) = month {
                partitions.push((month, path));
            }
        }
        partitions.sort_by_key(|(month, _)| *month);
        Ok(partitions)
    }
}
