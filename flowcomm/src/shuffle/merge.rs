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

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::api::{Comparator, RecordIter};
use crate::errors::{IOError, IOResult};

struct HeapEntry<T> {
    value: T,
    source: usize,
    cmp: Comparator<T>,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    // reversed, the max-heap pops the smallest value first, ties go to the
    // earliest source;
    fn cmp(&self, other: &Self) -> Ordering {
        (self.cmp)(&other.value, &self.value).then_with(|| other.source.cmp(&self.source))
    }
}

/// K-way merge of individually sorted record sequences.
pub struct MergeIter<T> {
    sources: Vec<RecordIter<T>>,
    heap: BinaryHeap<HeapEntry<T>>,
    cmp: Comparator<T>,
    primed: bool,
    error: Option<IOError>,
    failed: bool,
}

impl<T> MergeIter<T> {
    pub fn new(sources: Vec<RecordIter<T>>, cmp: Comparator<T>) -> Self {
        let heap = BinaryHeap::with_capacity(sources.len());
        MergeIter { sources, heap, cmp, primed: false, error: None, failed: false }
    }

    fn pull(&mut self, source: usize) {
        match self.sources[source].next() {
            Some(Ok(value)) => self
                .heap
                .push(HeapEntry { value, source, cmp: self.cmp.clone() }),
            Some(Err(e)) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
            None => (),
        }
    }
}

impl<T> Iterator for MergeIter<T> {
    type Item = IOResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if !self.primed {
            self.primed = true;
            for i in 0..self.sources.len() {
                self.pull(i);
            }
        }
        if let Some(e) = self.error.take() {
            self.failed = true;
            return Some(Err(e));
        }
        let top = self.heap.pop()?;
        self.pull(top.source);
        Some(Ok(top.value))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::natural_order;
    use crate::errors::IOErrorKind;

    fn source(values: Vec<i32>) -> RecordIter<i32> {
        Box::new(values.into_iter().map(Ok))
    }

    #[test]
    fn merge_sorted_sources() {
        let sources = vec![source(vec![1, 4, 9]), source(vec![]), source(vec![2, 3, 10]), source(vec![0, 4])];
        let merged = MergeIter::new(sources, natural_order())
            .collect::<IOResult<Vec<_>>>()
            .unwrap();
        assert_eq!(merged, vec![0, 1, 2, 3, 4, 4, 9, 10]);
    }

    #[test]
    fn ties_keep_source_order() {
        let cmp: Comparator<(i32, u8)> = std::sync::Arc::new(|a: &(i32, u8), b: &(i32, u8)| a.0.cmp(&b.0));
        let a: RecordIter<(i32, u8)> = Box::new(vec![(1, 0), (2, 0)].into_iter().map(Ok));
        let b: RecordIter<(i32, u8)> = Box::new(vec![(1, 1), (2, 1)].into_iter().map(Ok));
        let merged = MergeIter::new(vec![a, b], cmp)
            .collect::<IOResult<Vec<_>>>()
            .unwrap();
        assert_eq!(merged, vec![(1, 0), (1, 1), (2, 0), (2, 1)]);
    }

    #[test]
    fn error_stops_the_merge() {
        let bad: RecordIter<i32> = Box::new(
            vec![Ok(1), Err(IOError::new(IOErrorKind::IllegalState("broken")))].into_iter(),
        );
        let mut merged = MergeIter::new(vec![bad, source(vec![5])], natural_order());
        assert_eq!(merged.next().unwrap().unwrap(), 1);
        assert!(merged.next().unwrap().is_err());
        assert!(merged.next().is_none());
    }
}
