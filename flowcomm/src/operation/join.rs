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


use std::hash::Hash;

use super::{check, DataFlowOperation, EdgeTransport};
use crate::api::{BulkReceiver, Comparator};
use crate::channel::Channel;
use crate::config::CommConfig;
use crate::errors::{BuildOpError, IOResult};
use crate::message::MessageFlags;
use crate::plan::LogicalPlan;
use crate::receiver::{
    GatherPartialReceiver, JoinBatchFinalReceiver, JoinType, JoinedTuple, PartialReceiver,
};
use crate::selector::{DestinationSelector, HashingSelector};
use crate::{Data, TaskId};

fn check_join_edges(left: &LogicalPlan, right: &LogicalPlan) -> Result<(), BuildOpError> {
    let (l, r) = match (left.join_edge(), right.join_edge()) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            return BuildOpError::invalid_plan(format!(
                "edges {} and {} are not marked as join edges",
                left.edge(),
                right.edge()
            ))
        }
    };
    if l.index != 0 || r.index != 1 {
        return BuildOpError::invalid_plan(format!(
            "join expects the left edge at index 0 and the right one at 1, got {} and {}",
            l.index, r.index
        ));
    }
    if l.group != r.group {
        return BuildOpError::invalid_plan(format!("join edges in different groups: {} and {}", l.group, r.group));
    }
    if left.edge() == right.edge() {
        return BuildOpError::invalid_plan(format!("both join sides use edge {}", left.edge()));
    }
    if left.targets() != right.targets() {
        return BuildOpError::invalid_plan(format!(
            "join sides have different targets: {:?} and {:?}",
            left.targets(),
            right.targets()
        ));
    }
    if left.local_worker() != right.local_worker() {
        return BuildOpError::invalid_plan(format!(
            "join sides seen from different workers: {} and {}",
            left.local_worker(),
            right.local_worker()
        ));
    }
    Ok(())
}

/// Batch join of two edges on the key of their `(key, value)` records.
///
/// Both sides are routed to the targets with the same hashing selector, so equal keys
/// of the two edges always meet at the same target. Every target buffers both sides
/// sorted by key and, once all sources of both edges finished, hands the joined
/// tuples to the application in key order.
pub struct BJoin<K, L, R> {
    left_plan: LogicalPlan,
    right_plan: LogicalPlan,
    left_partial: GatherPartialReceiver<(K, L)>,
    right_partial: GatherPartialReceiver<(K, R)>,
    left_transport: EdgeTransport<(K, L)>,
    right_transport: EdgeTransport<(K, R)>,
    fin: JoinBatchFinalReceiver<K, L, R>,
    selector: HashingSelector,
    closed: bool,
}

impl<K, L, R> BJoin<K, L, R>
where
    K: Data + Hash + PartialEq + Clone,
    L: Data + Clone,
    R: Data + Clone,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new<B>(
        conf: &CommConfig, left_plan: LogicalPlan, right_plan: LogicalPlan, channel: Box<dyn Channel>,
        key_cmp: Comparator<K>, join_type: JoinType, receiver: B,
    ) -> Result<Self, BuildOpError>
    where
        B: BulkReceiver<JoinedTuple<K, L, R>> + 'static,
    {
        let conf = conf.with_streaming(false);
        check(&conf, &left_plan)?;
        check(&conf, &right_plan)?;
        check_join_edges(&left_plan, &right_plan)?;

        let mut selector = HashingSelector::new();
        DestinationSelector::<K>::prepare(&mut selector, left_plan.sources(), left_plan.targets());
        let left_partial = GatherPartialReceiver::new(&conf, &left_plan.local_sources(), left_plan.targets());
        let right_partial = GatherPartialReceiver::new(&conf, &right_plan.local_sources(), right_plan.targets());
        let left_transport = EdgeTransport::new(left_plan.clone(), channel.fork(), &conf)?;
        let right_transport = EdgeTransport::new(right_plan.clone(), channel, &conf)?;
        let fin = JoinBatchFinalReceiver::new(
            &format!("join-{}-{}", left_plan.edge(), right_plan.edge()),
            &conf,
            left_plan.sources(),
            right_plan.sources(),
            &left_plan.local_targets(),
            key_cmp,
            join_type,
            Box::new(receiver),
        );
        info!("build {:?} join of {} and {};", join_type, left_plan, right_plan);
        Ok(BJoin {
            left_plan,
            right_plan,
            left_partial,
            right_partial,
            left_transport,
            right_transport,
            fin,
            selector,
            closed: false,
        })
    }

    pub fn partition_left(&mut self, source: TaskId, key: K, value: L, flags: MessageFlags) -> Result<(), (K, L)> {
        assert!(
            self.left_plan.is_local_source(source),
            "{} is not a local source of the left edge {};",
            source,
            self.left_plan.edge()
        );
        let target = self.selector.next(source, &key);
        self.left_partial
            .on_message(source, target, flags, (key, value))
    }

    pub fn partition_right(&mut self, source: TaskId, key: K, value: R, flags: MessageFlags) -> Result<(), (K, R)> {
        assert!(
            self.right_plan.is_local_source(source),
            "{} is not a local source of the right edge {};",
            source,
            self.right_plan.edge()
        );
        let target = self.selector.next(source, &key);
        self.right_partial
            .on_message(source, target, flags, (key, value))
    }
}

impl<K, L, R> DataFlowOperation for BJoin<K, L, R>
where
    K: Data + Hash + PartialEq + Clone,
    L: Data + Clone,
    R: Data + Clone,
{
    fn progress(&mut self) -> IOResult<bool> {
        if self.closed {
            return Ok(false);
        }
        self.left_partial.progress(&mut self.left_transport)?;
        self.right_partial.progress(&mut self.right_transport)?;
        self.left_transport.progress_channel();
        self.right_transport.progress_channel();
        self.left_transport.pull()?;
        self.right_transport.pull()?;
        let fin = &mut self.fin;
        self.left_transport
            .deliver(|source, target, flags, msg| fin.on_left(source, target, flags, msg));
        self.right_transport
            .deliver(|source, target, flags, msg| fin.on_right(source, target, flags, msg));
        self.fin.progress()?;
        Ok(!self.is_complete())
    }

    fn is_complete(&self) -> bool {
        self.closed
            || (self.left_partial.is_complete()
                && self.right_partial.is_complete()
                && self.left_transport.is_idle()
                && self.right_transport.is_idle()
                && self.fin.is_complete())
    }

    fn finish(&mut self, source: TaskId) {
        let mut found = false;
        if self.left_plan.is_local_source(source) {
            self.left_partial.on_finish(source);
            found = true;
        }
        if self.right_plan.is_local_source(source) {
            self.right_partial.on_finish(source);
            found = true;
        }
        if !found {
            warn!(
                "finish {} which is a local source of neither edge {} nor {};",
                source,
                self.left_plan.edge(),
                self.right_plan.edge()
            );
        }
    }

    fn send_barrier(&mut self, source: TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>> {
        if self.left_plan.is_local_source(source) {
            self.left_partial.on_barrier(source, barrier)
        } else {
            assert!(
                self.right_plan.is_local_source(source),
                "{} is a local source of neither join edge;",
                source
            );
            self.right_partial.on_barrier(source, barrier)
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.left_partial.clean();
            self.right_partial.clean();
            self.left_transport.close();
            self.right_transport.close();
            self.fin.clean();
            self.closed = true;
            debug!("join of edges {} and {} closed;", self.left_plan.edge(), self.right_plan.edge());
        }
    }

    fn reset(&mut self) {
        self.left_partial.clean();
        self.right_partial.clean();
        self.left_transport.reset();
        self.right_transport.reset();
        self.fin.clean();
    }
}
