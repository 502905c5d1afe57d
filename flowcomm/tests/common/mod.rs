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


#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use flowcomm::api::{BulkReceiver, RecordIter, SingularReceiver};
use flowcomm::{CommConfig, DataFlowOperation, TaskId};

/// Small buffers, so that most transfers are cut across several of them;
pub fn conf(shuffle_dir: &Path) -> CommConfig {
    let _ = env_logger::try_init();
    CommConfig::default()
        .with_shuffle_dirs(vec![shuffle_dir.to_path_buf()])
        .with_buffer_size(64)
        .with_buffer_pool_size(32)
}

pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Retry `send` until the operation takes the record, progressing in between;
pub fn send_with_retry<O, M, F>(op: &mut O, mut msg: M, mut send: F)
where
    O: DataFlowOperation,
    F: FnMut(&mut O, M) -> Result<(), M>,
{
    let mut rounds = 0;
    loop {
        match send(op, msg) {
            Ok(()) => return,
            Err(back) => {
                msg = back;
                op.progress().unwrap();
                rounds += 1;
                assert!(rounds < 100_000, "record is never accepted;");
            }
        }
    }
}

pub fn run_to_end<O: DataFlowOperation + ?Sized>(op: &mut O) {
    assert!(op.wait_for_completion(100_000).unwrap(), "operation doesn't complete;");
}

pub type SyncLog = Arc<Mutex<Vec<(TaskId, Vec<u8>)>>>;

/// Application sink of singular values;
pub struct Values<T> {
    pub received: Arc<Mutex<Vec<(TaskId, T)>>>,
    pub synced: SyncLog,
}

impl<T> Values<T> {
    pub fn new() -> Self {
        Values { received: Arc::new(Mutex::new(vec![])), synced: Arc::new(Mutex::new(vec![])) }
    }

    pub fn handle(&self) -> Self {
        Values { received: self.received.clone(), synced: self.synced.clone() }
    }

    pub fn take(&self) -> Vec<(TaskId, T)> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }

    pub fn syncs(&self) -> Vec<(TaskId, Vec<u8>)> {
        self.synced.lock().unwrap().clone()
    }
}

impl<T: Send + 'static> SingularReceiver<T> for Values<T> {
    fn receive(&mut self, target: TaskId, value: T) {
        self.received.lock().unwrap().push((target, value));
    }

    fn sync(&mut self, target: TaskId, barrier: &[u8]) {
        self.synced
            .lock()
            .unwrap()
            .push((target, barrier.to_vec()));
    }
}

/// Application sink of record collections, one entry per `receive`;
pub struct Batches<T> {
    pub received: Arc<Mutex<Vec<(TaskId, Vec<T>)>>>,
    pub synced: SyncLog,
}

impl<T> Batches<T> {
    pub fn new() -> Self {
        Batches { received: Arc::new(Mutex::new(vec![])), synced: Arc::new(Mutex::new(vec![])) }
    }

    pub fn handle(&self) -> Self {
        Batches { received: self.received.clone(), synced: self.synced.clone() }
    }

    pub fn take(&self) -> Vec<(TaskId, Vec<T>)> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }

    /// Everything received for `target`, in delivery order;
    pub fn records_of(&self, target: TaskId) -> Vec<T>
    where
        T: Clone,
    {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == target)
            .flat_map(|(_, records)| records.iter().cloned())
            .collect()
    }

    pub fn syncs(&self) -> Vec<(TaskId, Vec<u8>)> {
        self.synced.lock().unwrap().clone()
    }
}

impl<T: Send + 'static> BulkReceiver<T> for Batches<T> {
    fn receive(&mut self, target: TaskId, records: RecordIter<T>) {
        let records = records.collect::<Result<Vec<_>, _>>().unwrap();
        self.received.lock().unwrap().push((target, records));
    }

    fn sync(&mut self, target: TaskId, barrier: &[u8]) {
        self.synced
            .lock()
            .unwrap()
            .push((target, barrier.to_vec()));
    }
}
