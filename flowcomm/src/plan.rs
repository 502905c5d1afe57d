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

use std::fmt::{Display, Formatter};

use nohash_hasher::{IntMap, IntSet};

use crate::errors::BuildOpError;
use crate::{EdgeId, TaskId, WorkerId};

/// Which side of a two-edge join group an edge feeds;
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinEdge {
    /// 0 for the left edge, 1 for the right one;
    pub index: u8,
    /// Shared by both edges of the group;
    pub group: String,
}

/// The static source and target sets of one operation instance, and the worker
/// hosting every task.
///
/// Every target expects data (or a finish signal) from every source. Tasks which
/// were never placed explicitly live on worker 0.
#[derive(Clone, Debug)]
pub struct LogicalPlan {
    edge: EdgeId,
    sources: Vec<TaskId>,
    targets: Vec<TaskId>,
    placement: IntMap<TaskId, WorkerId>,
    local_worker: WorkerId,
    join: Option<JoinEdge>,
}

impl LogicalPlan {
    pub fn new(edge: EdgeId, sources: Vec<TaskId>, targets: Vec<TaskId>) -> Self {
        LogicalPlan { edge, sources, targets, placement: IntMap::default(), local_worker: 0, join: None }
    }

    /// Place `tasks` on `worker`;
    pub fn place<I: IntoIterator<Item = TaskId>>(mut self, tasks: I, worker: WorkerId) -> Self {
        for t in tasks {
            self.placement.insert(t, worker);
        }
        self
    }

    /// The same plan as seen from `worker`;
    pub fn local_to(&self, worker: WorkerId) -> Self {
        let mut plan = self.clone();
        plan.local_worker = worker;
        plan
    }

    pub fn with_join_edge<S: Into<String>>(mut self, index: u8, group: S) -> Self {
        self.join = Some(JoinEdge { index, group: group.into() });
        self
    }

    pub fn validate(&self) -> Result<(), BuildOpError> {
        if self.sources.is_empty() {
            return BuildOpError::invalid_plan(format!("edge {} has no source", self.edge));
        }
        if self.targets.is_empty() {
            return BuildOpError::invalid_plan(format!("edge {} has no target", self.edge));
        }
        let mut seen = IntSet::default();
        for t in self.sources.iter() {
            if !seen.insert(*t) {
                return BuildOpError::invalid_plan(format!("duplicate source {} on edge {}", t, self.edge));
            }
        }
        seen.clear();
        for t in self.targets.iter() {
            if !seen.insert(*t) {
                return BuildOpError::invalid_plan(format!("duplicate target {} on edge {}", t, self.edge));
            }
        }
        if let Some(join) = self.join.as_ref() {
            if join.index > 1 {
                return BuildOpError::invalid_plan(format!("join edge index {} out of [0, 1]", join.index));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn edge(&self) -> EdgeId {
        self.edge
    }

    pub fn sources(&self) -> &[TaskId] {
        &self.sources
    }

    pub fn targets(&self) -> &[TaskId] {
        &self.targets
    }

    pub fn local_worker(&self) -> WorkerId {
        self.local_worker
    }

    pub fn join_edge(&self) -> Option<&JoinEdge> {
        self.join.as_ref()
    }

    #[inline]
    pub fn worker_of(&self, task: TaskId) -> WorkerId {
        self.placement.get(&task).copied().unwrap_or(0)
    }

    pub fn is_source(&self, task: TaskId) -> bool {
        self.sources.contains(&task)
    }

    pub fn is_target(&self, task: TaskId) -> bool {
        self.targets.contains(&task)
    }

    pub fn is_local_source(&self, task: TaskId) -> bool {
        self.is_source(task) && self.worker_of(task) == self.local_worker
    }

    pub fn is_local_target(&self, task: TaskId) -> bool {
        self.is_target(task) && self.worker_of(task) == self.local_worker
    }

    pub fn local_sources(&self) -> Vec<TaskId> {
        self.sources
            .iter()
            .copied()
            .filter(|t| self.worker_of(*t) == self.local_worker)
            .collect()
    }

    pub fn local_targets(&self) -> Vec<TaskId> {
        self.targets
            .iter()
            .copied()
            .filter(|t| self.worker_of(*t) == self.local_worker)
            .collect()
    }

    /// Sources `target` waits for before it is done;
    pub fn expected_ids(&self, _target: TaskId) -> &[TaskId] {
        &self.sources
    }
}

impl Display for LogicalPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "edge[{}] {:?} -> {:?} at worker {}", self.edge, self.sources, self.targets, self.local_worker)
    }
}
