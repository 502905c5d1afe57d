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

//! Routing of keyed records to targets.

use std::hash::{Hash, Hasher};

use ahash::AHasher;

use crate::TaskId;

/// Pick the target task of a keyed record.
///
/// The same key must always be routed to the same target while an operation
/// instance is alive;
pub trait DestinationSelector<K>: Send {
    /// Called once before the first `next`;
    fn prepare(&mut self, sources: &[TaskId], targets: &[TaskId]);

    fn next(&mut self, source: TaskId, key: &K) -> TaskId;
}

/// Hash of a key, stable across runs of the same binary;
#[inline]
pub fn stable_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = AHasher::new_with_keys(74786, 65535);
    key.hash(&mut hasher);
    hasher.finish()
}

enum Rectifier {
    And(u64),
    Mod(u64),
}

impl Rectifier {
    fn new(length: usize) -> Self {
        if length & (length - 1) == 0 {
            Rectifier::And(length as u64 - 1)
        } else {
            Rectifier::Mod(length as u64)
        }
    }

    #[inline]
    fn get(&self, v: u64) -> usize {
        let r = match self {
            Rectifier::And(b) => v & *b,
            Rectifier::Mod(b) => v % *b,
        };
        r as usize
    }
}

/// Default strategy: `stable_hash(key) mod targets`;
#[derive(Default)]
pub struct HashingSelector {
    targets: Vec<TaskId>,
    rectifier: Option<Rectifier>,
}

impl HashingSelector {
    pub fn new() -> Self {
        HashingSelector::default()
    }
}

impl<K: Hash> DestinationSelector<K> for HashingSelector {
    fn prepare(&mut self, _sources: &[TaskId], targets: &[TaskId]) {
        assert!(!targets.is_empty(), "no target to select from;");
        self.targets = targets.to_vec();
        self.rectifier = Some(Rectifier::new(targets.len()));
    }

    fn next(&mut self, _source: TaskId, key: &K) -> TaskId {
        let rectifier = self
            .rectifier
            .as_ref()
            .expect("selector is not prepared;");
        self.targets[rectifier.get(stable_hash(key))]
    }
}

/// Route with a user function producing a partition key, which is then mapped onto
/// the targets the same way as [`HashingSelector`] does;
pub struct FnSelector<F> {
    func: F,
    targets: Vec<TaskId>,
    rectifier: Option<Rectifier>,
}

impl<F> FnSelector<F> {
    pub fn new(func: F) -> Self {
        FnSelector { func, targets: vec![], rectifier: None }
    }
}

impl<K, F> DestinationSelector<K> for FnSelector<F>
where
    F: Fn(TaskId, &K) -> u64 + Send,
{
    fn prepare(&mut self, _sources: &[TaskId], targets: &[TaskId]) {
        assert!(!targets.is_empty(), "no target to select from;");
        self.targets = targets.to_vec();
        self.rectifier = Some(Rectifier::new(targets.len()));
    }

    fn next(&mut self, source: TaskId, key: &K) -> TaskId {
        let rectifier = self
            .rectifier
            .as_ref()
            .expect("selector is not prepared;");
        self.targets[rectifier.get((self.func)(source, key))]
    }
}
