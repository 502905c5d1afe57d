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


use std::sync::Arc;

use super::state::Targets;
use super::FinalReceiver;
use crate::api::{ReduceFunction, SingularReceiver};
use crate::config::CommConfig;
use crate::errors::IOResult;
use crate::message::{Incoming, MessageFlags, Payload};
use crate::{Data, TaskId};

fn fold<T>(acc: &mut Option<T>, payload: Payload<T>, func: &dyn ReduceFunction<T>) {
    for v in payload {
        *acc = Some(match acc.take() {
            Some(a) => func.reduce(a, v),
            None => v,
        });
    }
}

/// Folds everything arriving for a target, in arrival order, and delivers the value
/// once every source finished, followed by exactly one `sync`. Targets which got no
/// record at all only see the `sync`.
pub struct ReduceBatchFinalReceiver<T> {
    targets: Targets<T>,
    values: Vec<Option<T>>,
    func: Arc<dyn ReduceFunction<T>>,
    receiver: Box<dyn SingularReceiver<T>>,
}

impl<T: Data> ReduceBatchFinalReceiver<T> {
    pub fn new(
        conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], func: Arc<dyn ReduceFunction<T>>,
        mut receiver: Box<dyn SingularReceiver<T>>,
    ) -> Self {
        receiver.init(conf, targets);
        ReduceBatchFinalReceiver {
            targets: Targets::new(sources, targets, conf.send_pending_max(), false),
            values: targets.iter().map(|_| None).collect(),
            func,
            receiver,
        }
    }
}

impl<T: Data> FinalReceiver<T> for ReduceBatchFinalReceiver<T> {
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>> {
        self.targets.offer(source, target, flags, msg)
    }

    fn progress(&mut self) -> IOResult<()> {
        let func = self.func.as_ref();
        for (i, state) in self.targets.states_mut().enumerate() {
            if state.done {
                continue;
            }
            let acc = &mut self.values[i];
            for pos in 0..state.queues.len() {
                while let Some(payload) = state.pop(pos) {
                    fold(acc, payload, func);
                }
            }
            if state.all_finished() && state.drained() {
                state.done = true;
                debug!("reduce of target {} done;", state.target);
                if let Some(value) = acc.take() {
                    self.receiver.receive(state.target, value);
                }
                let barrier = state.sync_barrier();
                self.receiver.sync(state.target, &barrier);
            }
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.targets.all_done()
    }

    fn clean(&mut self) {
        self.targets.clean();
        for v in self.values.iter_mut() {
            *v = None;
        }
    }
}

/// Streaming reduce: a round fires when every source of a target has something
/// queued; the head records of the round are folded in source order and delivered.
/// When every source closed the window, `sync` is called and the next window starts.
pub struct ReduceStreamingFinalReceiver<T> {
    targets: Targets<T>,
    func: Arc<dyn ReduceFunction<T>>,
    receiver: Box<dyn SingularReceiver<T>>,
}

impl<T: Data> ReduceStreamingFinalReceiver<T> {
    pub fn new(
        conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], func: Arc<dyn ReduceFunction<T>>,
        mut receiver: Box<dyn SingularReceiver<T>>,
    ) -> Self {
        receiver.init(conf, targets);
        ReduceStreamingFinalReceiver {
            targets: Targets::new(sources, targets, conf.send_pending_max(), true),
            func,
            receiver,
        }
    }
}

impl<T: Data> FinalReceiver<T> for ReduceStreamingFinalReceiver<T> {
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>> {
        self.targets.offer(source, target, flags, msg)
    }

    fn progress(&mut self) -> IOResult<()> {
        let func = self.func.as_ref();
        for state in self.targets.states_mut() {
            loop {
                if state.window_closed() {
                    let barrier = state.close_window();
                    trace!("window of target {} closed;", state.target);
                    self.receiver.sync(state.target, &barrier);
                } else if state.window_round_ready() {
                    let mut acc = None;
                    for payload in state.pop_round() {
                        fold(&mut acc, payload, func);
                    }
                    if let Some(value) = acc {
                        self.receiver.receive(state.target, value);
                    }
                } else {
                    break;
                }
            }
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.targets.all_drained()
    }

    fn clean(&mut self) {
        self.targets.clean();
    }
}
