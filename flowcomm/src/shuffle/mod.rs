//
//! Copyright 2020 Alibaba Group Holding Limited.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! External sorted merger used by final receivers to buffer whole partitions.

use std::path::PathBuf;

mod group;
mod merge;
mod run;

pub use group::{group_by_key, GroupByKey};
pub use merge::MergeIter;
pub use run::RunReader;
use run::RunWriter;

use crate::api::{Comparator, RecordIter};
use crate::config::CommConfig;
use crate::errors::{IOError, IOErrorKind, IOResult};
use crate::message::LENGTH_PREFIX;
use crate::{Data, TaskId};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergerMode {
    Writing,
    Reading,
}

/// Buffers packed records of one target in memory; once the configured byte or
/// record bound is reached the buffer is written to a run file, sorted first when a
/// comparator is configured.
///
/// After [`switch_to_reading`](SpillMerger::switch_to_reading) no record is accepted
/// any more, and [`read_iterator`](SpillMerger::read_iterator) produces all records,
/// merged in comparator order or, without comparator, run by run followed by the
/// in-memory remainder. Run files are removed by [`clean`](SpillMerger::clean) or
/// when the merger is dropped.
pub struct SpillMerger<T> {
    name: String,
    target: TaskId,
    dirs: Vec<PathBuf>,
    next_dir: usize,
    max_bytes: usize,
    max_records: usize,
    use_disk: bool,
    comparator: Option<Comparator<T>>,
    memory: Vec<Vec<u8>>,
    memory_bytes: usize,
    runs: Vec<PathBuf>,
    mode: MergerMode,
    total: usize,
}

impl<T: Data> SpillMerger<T> {
    pub fn new<S: Into<String>>(
        name: S, target: TaskId, conf: &CommConfig, comparator: Option<Comparator<T>>,
    ) -> Self {
        SpillMerger {
            name: name.into(),
            target,
            dirs: conf.shuffle_dirs().to_vec(),
            next_dir: target as usize,
            max_bytes: conf.shuffle_max_bytes_in_memory(),
            max_records: conf.shuffle_max_records_in_memory(),
            use_disk: conf.use_disk() && !conf.shuffle_dirs().is_empty(),
            comparator,
            memory: vec![],
            memory_bytes: 0,
            runs: vec![],
            mode: MergerMode::Writing,
            total: 0,
        }
    }

    pub fn add(&mut self, record: &T) -> IOResult<()> {
        self.add_bytes(record.pack_to_bytes())
    }

    pub fn add_bytes(&mut self, bytes: Vec<u8>) -> IOResult<()> {
        if self.mode == MergerMode::Reading {
            throw_io_error!(IOErrorKind::IllegalState("add records to a merger in reading mode"));
        }
        self.memory_bytes += bytes.len() + LENGTH_PREFIX;
        self.memory.push(bytes);
        self.total += 1;
        if self.use_disk && (self.memory_bytes >= self.max_bytes || self.memory.len() >= self.max_records) {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> IOResult<()> {
        let mut records = std::mem::take(&mut self.memory);
        self.memory_bytes = 0;
        if let Some(cmp) = self.comparator.as_ref() {
            records = sort_packed(records, cmp)?;
        }
        let dir = self.dirs[self.next_dir % self.dirs.len()].clone();
        self.next_dir += 1;
        let mut writer = RunWriter::create(&dir, &self.name, self.target)?;
        debug!("spill {} records of target {} to {:?};", records.len(), self.target, writer.path());
        for bytes in records.iter() {
            writer.write(bytes)?;
        }
        let (path, _) = writer.finish()?;
        self.runs.push(path);
        Ok(())
    }

    pub fn switch_to_reading(&mut self) -> IOResult<()> {
        if self.mode == MergerMode::Reading {
            return Ok(());
        }
        if let Some(cmp) = self.comparator.as_ref() {
            let records = std::mem::take(&mut self.memory);
            self.memory = sort_packed(records, cmp)?;
        }
        self.mode = MergerMode::Reading;
        debug!(
            "merger {} of target {} switch to reading: {} records, {} runs;",
            self.name,
            self.target,
            self.total,
            self.runs.len()
        );
        Ok(())
    }

    /// All records added so far; records are decoded lazily while iterating;
    pub fn read_iterator(&self) -> IOResult<RecordIter<T>> {
        if self.mode != MergerMode::Reading {
            throw_io_error!(IOErrorKind::IllegalState("read a merger which is still writing"));
        }
        let mut sources: Vec<RecordIter<T>> = Vec::with_capacity(self.runs.len() + 1);
        for path in self.runs.iter() {
            sources.push(Box::new(RunReader::<T>::open(path)?));
        }
        let memory = self.memory.clone();
        sources.push(Box::new(memory.into_iter().map(|bytes| decode::<T>(&bytes))));
        match self.comparator.as_ref() {
            Some(cmp) => Ok(Box::new(MergeIter::new(sources, cmp.clone()))),
            None => Ok(Box::new(sources.into_iter().flatten())),
        }
    }

    /// Remove every run file and forget all records, the merger can be written again;
    pub fn clean(&mut self) {
        for path in self.runs.drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("fail to remove spill file {:?}: {}", path, e);
                }
            }
        }
        self.memory.clear();
        self.memory_bytes = 0;
        self.total = 0;
        self.mode = MergerMode::Writing;
    }

    /// Records added since creation or the last clean;
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn mode(&self) -> MergerMode {
        self.mode
    }

    pub fn run_files(&self) -> &[PathBuf] {
        &self.runs
    }

    pub fn records_in_memory(&self) -> usize {
        self.memory.len()
    }
}

impl<T> Drop for SpillMerger<T> {
    fn drop(&mut self) {
        for path in self.runs.drain(..) {
            let _ = std::fs::remove_file(&path);
        }
    }
}

fn decode<T: Data>(bytes: &[u8]) -> IOResult<T> {
    T::unpack_from_bytes(bytes).map_err(|e| IOError::new(IOErrorKind::Decode(e)))
}

fn sort_packed<T: Data>(records: Vec<Vec<u8>>, cmp: &Comparator<T>) -> IOResult<Vec<Vec<u8>>> {
    let mut decoded = Vec::with_capacity(records.len());
    for bytes in records {
        let value = decode::<T>(&bytes)?;
        decoded.push((value, bytes));
    }
    decoded.sort_by(|a, b| cmp(&a.0, &b.0));
    Ok(decoded.into_iter().map(|(_, bytes)| bytes).collect())
}
