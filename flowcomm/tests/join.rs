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


use flowcomm::api::natural_order;
use flowcomm::channel::LocalChannel;
use flowcomm::operation::BJoin;
use flowcomm::receiver::{JoinType, JoinedTuple};
use flowcomm::{BuildOpError, DataFlowOperation, LogicalPlan, MessageFlags};

mod common;
use common::*;

type Row = (u32, Option<String>, Option<u64>);

fn plans() -> (LogicalPlan, LogicalPlan) {
    let left = LogicalPlan::new(10, vec![0, 1], vec![4, 5]).with_join_edge(0, "orders");
    let right = LogicalPlan::new(11, vec![2, 3], vec![4, 5]).with_join_edge(1, "orders");
    (left, right)
}

fn join(join_type: JoinType) -> Vec<Row> {
    let dir = tempfile::tempdir().unwrap();
    let conf = conf(dir.path()).with_shuffle_max_records_in_memory(2);
    let sink = Batches::<JoinedTuple<u32, String, u64>>::new();
    let (left, right) = plans();
    let channel = Box::new(LocalChannel::with_config(&conf));
    let mut op = BJoin::new(&conf, left, right, channel, natural_order(), join_type, sink.handle()).unwrap();

    let left_rows = [(0, 1, "a"), (1, 2, "b"), (0, 2, "c"), (1, 4, "d")];
    for (source, key, value) in left_rows {
        op.partition_left(source, key, value.to_owned(), MessageFlags::empty())
            .unwrap();
    }
    let right_rows = [(2, 4, 41u64), (3, 2, 20), (2, 3, 30), (3, 4, 40)];
    for (source, key, value) in right_rows {
        op.partition_right(source, key, value, MessageFlags::empty())
            .unwrap();
    }
    for source in 0..4 {
        op.finish(source);
    }
    run_to_end(&mut op);

    for t in [4u32, 5] {
        let keys = sink
            .records_of(t)
            .iter()
            .map(|row| row.key)
            .collect::<Vec<_>>();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted, "target {}", t);
    }
    assert_eq!(sink.syncs().len(), 2);
    op.close();
    assert_eq!(files_in(dir.path()), 0);

    let mut rows = sink
        .take()
        .into_iter()
        .flat_map(|(_, rows)| rows)
        .map(|row| (row.key, row.left, row.right))
        .collect::<Vec<_>>();
    rows.sort();
    rows
}

fn row(key: u32, left: Option<&str>, right: Option<u64>) -> Row {
    (key, left.map(|s| s.to_owned()), right)
}

fn matched() -> Vec<Row> {
    vec![
        row(2, Some("b"), Some(20)),
        row(2, Some("c"), Some(20)),
        row(4, Some("d"), Some(40)),
        row(4, Some("d"), Some(41)),
    ]
}

#[test]
fn inner_join() {
    assert_eq!(join(JoinType::Inner), matched());
}

#[test]
fn left_outer_join() {
    let mut expected = matched();
    expected.push(row(1, Some("a"), None));
    expected.sort();
    assert_eq!(join(JoinType::Left), expected);
}

#[test]
fn right_outer_join() {
    let mut expected = matched();
    expected.push(row(3, None, Some(30)));
    expected.sort();
    assert_eq!(join(JoinType::Right), expected);
}

#[test]
fn full_outer_join() {
    let mut expected = matched();
    expected.push(row(1, Some("a"), None));
    expected.push(row(3, None, Some(30)));
    expected.sort();
    assert_eq!(join(JoinType::FullOuter), expected);
}

fn build(left: LogicalPlan, right: LogicalPlan) -> BuildOpError {
    let dir = tempfile::tempdir().unwrap();
    let conf = conf(dir.path());
    let channel = Box::new(LocalChannel::with_config(&conf));
    BJoin::<u32, u32, u32>::new(&conf, left, right, channel, natural_order(), JoinType::Inner, Batches::new())
        .err()
        .unwrap()
}

#[test]
fn join_edges_are_validated() {
    let both_left = build(
        LogicalPlan::new(1, vec![0], vec![2]).with_join_edge(0, "g"),
        LogicalPlan::new(2, vec![1], vec![2]).with_join_edge(0, "g"),
    );
    assert!(matches!(both_left, BuildOpError::InvalidPlan(_)));

    let other_targets = build(
        LogicalPlan::new(1, vec![0], vec![2]).with_join_edge(0, "g"),
        LogicalPlan::new(2, vec![1], vec![3]).with_join_edge(1, "g"),
    );
    assert!(matches!(other_targets, BuildOpError::InvalidPlan(_)));

    let other_groups = build(
        LogicalPlan::new(1, vec![0], vec![2]).with_join_edge(0, "g"),
        LogicalPlan::new(2, vec![1], vec![2]).with_join_edge(1, "h"),
    );
    assert!(matches!(other_groups, BuildOpError::InvalidPlan(_)));

    let same_edge = build(
        LogicalPlan::new(1, vec![0], vec![2]).with_join_edge(0, "g"),
        LogicalPlan::new(1, vec![1], vec![2]).with_join_edge(1, "g"),
    );
    assert!(matches!(same_edge, BuildOpError::InvalidPlan(_)));

    let unmarked = build(LogicalPlan::new(1, vec![0], vec![2]), LogicalPlan::new(2, vec![1], vec![2]));
    assert!(matches!(unmarked, BuildOpError::InvalidPlan(_)));
}
