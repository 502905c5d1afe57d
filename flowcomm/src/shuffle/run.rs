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

//! Run files: a sequence of `u32` big-endian length prefixed packed records.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use flowcomm_common::packer::Packer;
use rand::Rng;

use crate::errors::{IOError, IOErrorKind, IOResult};
use crate::message::LENGTH_PREFIX;
use crate::TaskId;

static NEXT_RUN: AtomicU64 = AtomicU64::new(0);

fn spill_err<P: Into<PathBuf>>(path: P, err: io::Error) -> IOError {
    error!("spill file io failure: {}", err);
    IOError::new(IOErrorKind::spill(path, err))
}

fn create_run_file(dir: &Path, name: &str, target: TaskId) -> IOResult<(PathBuf, File)> {
    std::fs::create_dir_all(dir).map_err(|e| spill_err(dir, e))?;
    let mut attempts = 0;
    loop {
        let seq = NEXT_RUN.fetch_add(1, Ordering::AcqRel);
        let salt: u32 = rand::thread_rng().gen();
        let file_name = format!("{}-{}-{}-{}-{:x}.run", name, target, std::process::id(), seq, salt);
        let path = dir.join(file_name);
        match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
        {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists && attempts < 3 => {
                attempts += 1;
            }
            Err(err) => return Err(spill_err(path, err)),
        }
    }
}

pub(crate) struct RunWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

impl RunWriter {
    pub fn create(dir: &Path, name: &str, target: TaskId) -> IOResult<Self> {
        let (path, file) = create_run_file(dir, name, target)?;
        Ok(RunWriter { path, writer: BufWriter::new(file), records: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, bytes: &[u8]) -> IOResult<()> {
        let len = (bytes.len() as u32).to_be_bytes();
        if let Err(e) = self
            .writer
            .write_all(&len)
            .and_then(|_| self.writer.write_all(bytes))
        {
            return Err(spill_err(self.path.clone(), e));
        }
        self.records += 1;
        Ok(())
    }

    /// Flush the run and return its path with the number of records written;
    pub fn finish(mut self) -> IOResult<(PathBuf, usize)> {
        if let Err(e) = self.writer.flush() {
            return Err(spill_err(self.path, e));
        }
        Ok((self.path, self.records))
    }
}

/// Sequential reader of one run file;
pub struct RunReader<T> {
    path: PathBuf,
    reader: BufReader<File>,
    exhausted: bool,
    _ph: PhantomData<fn() -> T>,
}

impl<T: Packer> RunReader<T> {
    pub fn open<P: AsRef<Path>>(path: P) -> IOResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| spill_err(path.clone(), e))?;
        Ok(RunReader { path, reader: BufReader::new(file), exhausted: false, _ph: PhantomData })
    }

    fn read_length(&mut self) -> IOResult<Option<usize>> {
        let mut len = [0u8; LENGTH_PREFIX];
        let mut read = 0;
        while read < LENGTH_PREFIX {
            match self.reader.read(&mut len[read..]) {
                Ok(0) if read == 0 => return Ok(None),
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::UnexpectedEof, "truncated length prefix");
                    return Err(spill_err(self.path.clone(), err));
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => (),
                Err(e) => return Err(spill_err(self.path.clone(), e)),
            }
        }
        Ok(Some(u32::from_be_bytes(len) as usize))
    }

    fn read_record(&mut self) -> IOResult<Option<T>> {
        let len = match self.read_length()? {
            Some(len) => len,
            None => return Ok(None),
        };
        let mut bytes = vec![0u8; len];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| spill_err(self.path.clone(), e))?;
        let record = T::unpack_from_bytes(&bytes).map_err(|e| IOError::new(IOErrorKind::Decode(e)))?;
        Ok(Some(record))
    }
}

impl<T: Packer> Iterator for RunReader<T> {
    type Item = IOResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_and_read_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RunWriter::create(dir.path(), "gather-0", 3).unwrap();
        for i in 0..100u32 {
            writer.write(&i.pack_to_bytes()).unwrap();
        }
        let (path, count) = writer.finish().unwrap();
        assert_eq!(count, 100);
        let name = path.file_name().unwrap().to_str().unwrap().to_owned();
        assert!(name.starts_with("gather-0-3-"), "{}", name);
        assert!(name.ends_with(".run"), "{}", name);
        let values = RunReader::<u32>::open(&path)
            .unwrap()
            .collect::<IOResult<Vec<_>>>()
            .unwrap();
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn truncated_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.run");
        std::fs::write(&path, [0u8, 0, 0, 4, 1, 2]).unwrap();
        let mut reader = RunReader::<u32>::open(&path).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(err.is_spill());
        assert!(reader.next().is_none());
    }

    #[test]
    fn missing_run_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunReader::<u32>::open(dir.path().join("nope.run"))
            .err()
            .unwrap();
        assert!(err.is_spill());
    }
}
