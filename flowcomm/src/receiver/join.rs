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
use std::collections::VecDeque;

use super::gather::Collector;
use crate::api::{by_key, BulkReceiver, Comparator, RecordIter};
use crate::config::CommConfig;
use crate::errors::IOResult;
use crate::message::{Incoming, MessageFlags};
use crate::shuffle::{group_by_key, GroupByKey};
use crate::{Data, TaskId};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    FullOuter,
}

impl JoinType {
    #[inline]
    fn keeps_left(&self) -> bool {
        matches!(self, JoinType::Left | JoinType::FullOuter)
    }

    #[inline]
    fn keeps_right(&self) -> bool {
        matches!(self, JoinType::Right | JoinType::FullOuter)
    }
}

/// One output row of a join, a side is `None` when the key has no match there;
#[derive(Clone, Debug, PartialEq)]
pub struct JoinedTuple<K, L, R> {
    pub key: K,
    pub left: Option<L>,
    pub right: Option<R>,
}

impl<K, L, R> JoinedTuple<K, L, R> {
    pub fn new(key: K, left: Option<L>, right: Option<R>) -> Self {
        JoinedTuple { key, left, right }
    }
}

/// Sort-merge join of two key-sorted inputs. Groups of equal keys are read one at a
/// time from each side; matching groups produce their cross product.
pub struct JoinIter<K, L, R> {
    left: GroupByKey<K, L, RecordIter<(K, L)>>,
    right: GroupByKey<K, R, RecordIter<(K, R)>>,
    key_cmp: Comparator<K>,
    join_type: JoinType,
    left_group: Option<(K, Vec<L>)>,
    right_group: Option<(K, Vec<R>)>,
    out: VecDeque<JoinedTuple<K, L, R>>,
    failed: bool,
}

impl<K: PartialEq + Clone, L: Clone, R: Clone> JoinIter<K, L, R> {
    pub fn new(
        left: RecordIter<(K, L)>, right: RecordIter<(K, R)>, key_cmp: Comparator<K>, join_type: JoinType,
    ) -> Self {
        JoinIter {
            left: group_by_key(left),
            right: group_by_key(right),
            key_cmp,
            join_type,
            left_group: None,
            right_group: None,
            out: VecDeque::new(),
            failed: false,
        }
    }

    fn emit_left(&mut self, key: K, values: Vec<L>) {
        if self.join_type.keeps_left() {
            for l in values {
                self.out
                    .push_back(JoinedTuple::new(key.clone(), Some(l), None));
            }
        }
    }

    fn emit_right(&mut self, key: K, values: Vec<R>) {
        if self.join_type.keeps_right() {
            for r in values {
                self.out
                    .push_back(JoinedTuple::new(key.clone(), None, Some(r)));
            }
        }
    }
}

impl<K: PartialEq + Clone, L: Clone, R: Clone> Iterator for JoinIter<K, L, R> {
    type Item = IOResult<JoinedTuple<K, L, R>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.out.pop_front() {
                return Some(Ok(tuple));
            }
            if self.failed {
                return None;
            }
            if self.left_group.is_none() {
                match self.left.next() {
                    Some(Ok(group)) => self.left_group = Some(group),
                    Some(Err(e)) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    None => (),
                }
            }
            if self.right_group.is_none() {
                match self.right.next() {
                    Some(Ok(group)) => self.right_group = Some(group),
                    Some(Err(e)) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    None => (),
                }
            }
            match (self.left_group.take(), self.right_group.take()) {
                (None, None) => return None,
                (Some(_), None) if !self.join_type.keeps_left() => return None,
                (None, Some(_)) if !self.join_type.keeps_right() => return None,
                (Some((k, ls)), None) => self.emit_left(k, ls),
                (None, Some((k, rs))) => self.emit_right(k, rs),
                (Some((lk, ls)), Some((rk, rs))) => match (self.key_cmp)(&lk, &rk) {
                    Ordering::Less => {
                        self.emit_left(lk, ls);
                        self.right_group = Some((rk, rs));
                    }
                    Ordering::Greater => {
                        self.emit_right(rk, rs);
                        self.left_group = Some((lk, ls));
                    }
                    Ordering::Equal => {
                        for l in ls {
                            for r in rs.iter() {
                                self.out
                                    .push_back(JoinedTuple::new(lk.clone(), Some(l.clone()), Some(r.clone())));
                            }
                        }
                    }
                },
            }
        }
    }
}

/// Final receiver of a join: the left and right edges are collected per target into
/// key-sorted mergers, a target is joined once every source of both edges finished.
pub struct JoinBatchFinalReceiver<K, L, R> {
    left: Collector<(K, L)>,
    right: Collector<(K, R)>,
    key_cmp: Comparator<K>,
    join_type: JoinType,
    receiver: Box<dyn BulkReceiver<JoinedTuple<K, L, R>>>,
}

impl<K, L, R> JoinBatchFinalReceiver<K, L, R>
where
    K: Data + PartialEq + Clone,
    L: Data + Clone,
    R: Data + Clone,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str, conf: &CommConfig, left_sources: &[TaskId], right_sources: &[TaskId], targets: &[TaskId],
        key_cmp: Comparator<K>, join_type: JoinType, mut receiver: Box<dyn BulkReceiver<JoinedTuple<K, L, R>>>,
    ) -> Self {
        receiver.init(conf, targets);
        let left = Collector::new(&format!("{}-left", name), conf, left_sources, targets, Some(by_key(key_cmp.clone())));
        let right =
            Collector::new(&format!("{}-right", name), conf, right_sources, targets, Some(by_key(key_cmp.clone())));
        JoinBatchFinalReceiver { left, right, key_cmp, join_type, receiver }
    }

    pub fn on_left(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<(K, L)>,
    ) -> Result<(), Incoming<(K, L)>> {
        self.left.offer(source, target, flags, msg)
    }

    pub fn on_right(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<(K, R)>,
    ) -> Result<(), Incoming<(K, R)>> {
        self.right.offer(source, target, flags, msg)
    }

    pub fn progress(&mut self) -> IOResult<()> {
        self.left.collect(false)?;
        self.right.collect(false)?;
        for i in 0..self.left.len() {
            if self.left.is_ready(i) && self.right.is_ready(i) {
                let target = self.left.target(i);
                let left = self.left.seal(i)?;
                let right = self.right.seal(i)?;
                debug!("join target {} ({:?});", target, self.join_type);
                let joined = JoinIter::new(left, right, self.key_cmp.clone(), self.join_type);
                self.receiver.receive(target, Box::new(joined));
                let mut barrier = self.left.take_barrier(i);
                if barrier.is_empty() {
                    barrier = self.right.take_barrier(i);
                }
                self.receiver.sync(target, &barrier);
            }
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.left.is_complete() && self.right.is_complete()
    }

    pub fn clean(&mut self) {
        self.left.clean();
        self.right.clean();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::natural_order;
    use crate::message::Payload;
    use crate::receiver::reduce::test::Sink;

    type Row = JoinedTuple<u32, String, u64>;

    fn left() -> RecordIter<(u32, String)> {
        let rows = vec![(1, "a"), (2, "b"), (2, "c"), (4, "d")];
        Box::new(rows.into_iter().map(|(k, v)| Ok((k, v.to_owned()))))
    }

    fn right() -> RecordIter<(u32, u64)> {
        Box::new(vec![(2, 20), (3, 30), (4, 40), (4, 41)].into_iter().map(Ok))
    }

    fn join(join_type: JoinType) -> Vec<Row> {
        JoinIter::new(left(), right(), natural_order(), join_type)
            .collect::<IOResult<Vec<_>>>()
            .unwrap()
    }

    fn row(key: u32, left: Option<&str>, right: Option<u64>) -> Row {
        JoinedTuple::new(key, left.map(|s| s.to_owned()), right)
    }

    #[test]
    fn inner_join() {
        assert_eq!(
            join(JoinType::Inner),
            vec![
                row(2, Some("b"), Some(20)),
                row(2, Some("c"), Some(20)),
                row(4, Some("d"), Some(40)),
                row(4, Some("d"), Some(41)),
            ]
        );
    }

    #[test]
    fn left_and_right_joins() {
        let left_join = join(JoinType::Left);
        assert_eq!(left_join[0], row(1, Some("a"), None));
        assert_eq!(left_join.len(), 5);
        let right_join = join(JoinType::Right);
        assert!(right_join.contains(&row(3, None, Some(30))));
        assert!(!right_join.iter().any(|r| r.right.is_none()));
        assert_eq!(right_join.len(), 5);
    }

    #[test]
    fn full_outer_join() {
        let rows = join(JoinType::FullOuter);
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], row(1, Some("a"), None));
        assert_eq!(rows[3], row(3, None, Some(30)));
    }

    #[test]
    fn receiver_waits_for_both_edges() {
        let sink = Sink::<Vec<JoinedTuple<u32, u32, u32>>>::default();
        let conf = CommConfig::default();
        let mut fin =
            JoinBatchFinalReceiver::new("join-0", &conf, &[0], &[1], &[5], natural_order(), JoinType::Inner, Box::new(sink.clone()));
        fin.on_left(0, 5, MessageFlags::FINAL, Incoming::Data(Payload::from(vec![(2, 1), (1, 1)])))
            .unwrap();
        fin.progress().unwrap();
        assert!(!fin.is_complete());
        assert!(sink.received.lock().unwrap().is_empty());
        fin.on_right(1, 5, MessageFlags::FINAL, Incoming::Data(Payload::from(vec![(1, 7)])))
            .unwrap();
        fin.progress().unwrap();
        assert!(fin.is_complete());
        assert_eq!(*sink.received.lock().unwrap(), vec![(5, vec![JoinedTuple::new(1, Some(1), Some(7))])]);
        assert_eq!(sink.synced.lock().unwrap().len(), 1);
    }
}
