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


use std::collections::VecDeque;
use std::marker::PhantomData;

use ahash::AHashMap;

use crate::channel::{Channel, Envelope};
use crate::config::CommConfig;
use crate::errors::{BuildOpError, IOError, IOErrorKind, IOResult};
use crate::message::{InMessage, Incoming, MessageFlags, OutMessage, Payload};
use crate::plan::LogicalPlan;
use crate::receiver::Forward;
use crate::{Data, EdgeId, TaskId};

type Route = (TaskId, TaskId);

/// Moves the transfers of one edge over a [`Channel`]: frames what partial receivers
/// forward into pooled buffers, and reassembles what arrives for the local targets.
///
/// Reassembled transfers wait in a FIFO per (target, source) until the final
/// receiver accepts them.
pub struct EdgeTransport<T> {
    plan: LogicalPlan,
    channel: Box<dyn Channel>,
    max_object_size: usize,
    local_targets: Vec<TaskId>,
    in_flight: AHashMap<Route, InMessage>,
    pending: AHashMap<Route, VecDeque<(MessageFlags, Incoming<T>)>>,
    registered: bool,
    _ph: PhantomData<fn() -> T>,
}

impl<T: Data> EdgeTransport<T> {
    pub fn new(plan: LogicalPlan, mut channel: Box<dyn Channel>, conf: &CommConfig) -> Result<Self, BuildOpError> {
        let local_targets = plan.local_targets();
        for t in local_targets.iter() {
            channel.register(plan.edge(), *t)?;
        }
        Ok(EdgeTransport {
            plan,
            channel,
            max_object_size: conf.max_object_size(),
            local_targets,
            in_flight: AHashMap::new(),
            pending: AHashMap::new(),
            registered: true,
            _ph: PhantomData,
        })
    }

    #[inline]
    pub fn edge(&self) -> EdgeId {
        self.plan.edge()
    }

    pub fn plan(&self) -> &LogicalPlan {
        &self.plan
    }

    /// Advance the I/O of the underlying channel;
    pub fn progress_channel(&mut self) {
        self.channel.progress();
    }

    fn send_message(&mut self, msg: OutMessage) -> IOResult<bool> {
        let count = msg.num_buffers(self.channel.buffer_size());
        let buffers = match self.channel.try_acquire(count) {
            Some(buffers) => buffers,
            None => return Ok(false),
        };
        let header = *msg.header();
        trace!("send transfer {} in {} buffers;", header, count);
        for buffer in msg.split_into(buffers) {
            let envelope = Envelope { edge: header.edge, source: header.source, target: header.target, buffer };
            self.channel.send(envelope)?;
        }
        Ok(true)
    }

    /// Receive everything the channel has for the local targets; returns the number of
    /// buffers received;
    pub fn pull(&mut self) -> IOResult<usize> {
        let edge = self.plan.edge();
        let mut received = 0;
        for i in 0..self.local_targets.len() {
            let target = self.local_targets[i];
            loop {
                let envelope = match self.channel.receive(edge, target) {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => break,
                    Err(e) if e.is_eof() => break,
                    Err(e) => return Err(e.into()),
                };
                received += 1;
                self.accept(envelope)?;
            }
        }
        Ok(received)
    }

    fn accept(&mut self, envelope: Envelope) -> IOResult<()> {
        let Envelope { edge, source, target, buffer } = envelope;
        if edge != self.plan.edge() || !self.plan.is_source(source) || !self.plan.is_local_target(target) {
            self.channel.release(buffer);
            throw_io_error!(IOErrorKind::protocol(source, target, format!("unexpected transfer on edge {}", edge)));
        }
        let max_object_size = self.max_object_size;
        let route = (target, source);
        let added = self
            .in_flight
            .entry(route)
            .or_insert_with(|| InMessage::new(edge, source, target, max_object_size))
            .add_buffer(buffer);
        match added {
            Ok(false) => Ok(()),
            Ok(true) => {
                let parts = self
                    .in_flight
                    .remove(&route)
                    .and_then(|msg| msg.into_parts());
                let (header, records, buffers) = match parts {
                    Some(parts) => parts,
                    None => throw_io_error!(IOErrorKind::IllegalState("complete transfer without parts")),
                };
                // every declared record was copied out, the buffers can go back;
                for b in buffers {
                    self.channel.release(b);
                }
                let incoming = Self::decode(header.flags, records)?;
                self.pending
                    .entry(route)
                    .or_insert_with(VecDeque::new)
                    .push_back((header.flags, incoming));
                Ok(())
            }
            Err(e) => {
                error!("transfer {} -> {} on edge {} broken: {}", source, target, edge, e);
                if let Some(mut msg) = self.in_flight.remove(&route) {
                    for b in msg.take_buffers() {
                        self.channel.release(b);
                    }
                }
                Err(e)
            }
        }
    }

    fn decode(flags: MessageFlags, records: Vec<Vec<u8>>) -> IOResult<Incoming<T>> {
        if flags.contains(MessageFlags::BARRIER) {
            return Ok(Incoming::Barrier(records.into_iter().next().unwrap_or_default()));
        }
        if records.is_empty() {
            return Ok(Incoming::Empty);
        }
        let mut values = Vec::with_capacity(records.len());
        for bytes in records {
            let value = T::unpack_from_bytes(&bytes).map_err(|e| IOError::new(IOErrorKind::Decode(e)))?;
            values.push(value);
        }
        Ok(Incoming::Data(Payload::from(values)))
    }

    /// Hand reassembled transfers to `sink` in arrival order per (target, source); a
    /// transfer given back stays at the head of its queue; returns the number handed
    /// over;
    pub fn deliver<F>(&mut self, mut sink: F) -> usize
    where
        F: FnMut(TaskId, TaskId, MessageFlags, Incoming<T>) -> Result<(), Incoming<T>>,
    {
        let mut delivered = 0;
        for ((target, source), queue) in self.pending.iter_mut() {
            while let Some((flags, msg)) = queue.pop_front() {
                match sink(*source, *target, flags, msg) {
                    Ok(()) => delivered += 1,
                    Err(msg) => {
                        queue.push_front((flags, msg));
                        break;
                    }
                }
            }
        }
        delivered
    }

    /// Nothing is half received or waiting for the final receiver;
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.pending.values().all(|q| q.is_empty())
    }

    fn drop_in_flight(&mut self) {
        for (_, mut msg) in self.in_flight.drain() {
            for b in msg.take_buffers() {
                self.channel.release(b);
            }
        }
        self.pending.clear();
    }

    /// Forget half received transfers and undelivered ones, registrations are kept;
    pub fn reset(&mut self) {
        self.drop_in_flight();
    }

    /// Release every buffer still held for the local targets and deregister them;
    pub fn close(&mut self) {
        if !self.registered {
            return;
        }
        let edge = self.plan.edge();
        for i in 0..self.local_targets.len() {
            let target = self.local_targets[i];
            while let Ok(Some(envelope)) = self.channel.receive(edge, target) {
                self.channel.release(envelope.buffer);
            }
        }
        self.drop_in_flight();
        for i in 0..self.local_targets.len() {
            self.channel.deregister(edge, self.local_targets[i]);
        }
        self.registered = false;
        debug!("transport of edge {} closed;", edge);
    }
}

impl<T: Data> Forward<T> for EdgeTransport<T> {
    fn forward(&mut self, source: TaskId, target: TaskId, flags: MessageFlags, records: &[T]) -> IOResult<bool> {
        let mut msg = OutMessage::new(source, target, self.plan.edge(), flags);
        for r in records {
            msg.push(r, self.max_object_size)?;
        }
        self.send_message(msg)
    }

    fn forward_barrier(&mut self, source: TaskId, target: TaskId, barrier: &[u8]) -> IOResult<bool> {
        let mut msg = OutMessage::new(source, target, self.plan.edge(), MessageFlags::BARRIER);
        msg.push_bytes(barrier, self.max_object_size)?;
        self.send_message(msg)
    }
}

impl<T> Drop for EdgeTransport<T> {
    fn drop(&mut self) {
        if self.registered {
            let edge = self.plan.edge();
            for t in self.local_targets.iter() {
                self.channel.deregister(edge, *t);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::channel::{DataBuffer, LocalChannel};

    fn conf() -> CommConfig {
        CommConfig::default()
            .with_buffer_size(32)
            .with_buffer_pool_size(8)
    }

    #[test]
    fn forward_pull_and_deliver() {
        let conf = conf();
        let plan = LogicalPlan::new(3, vec![0, 1], vec![2]);
        let channel = LocalChannel::with_config(&conf);
        let mut transport = EdgeTransport::<u64>::new(plan, Box::new(channel.fork_local()), &conf).unwrap();
        assert!(transport
            .forward(0, 2, MessageFlags::empty(), &(0..10).collect::<Vec<_>>())
            .unwrap());
        assert!(transport
            .forward(1, 2, MessageFlags::FINAL_EMPTY, &[])
            .unwrap());
        assert!(transport.forward_barrier(1, 2, &[9, 9]).unwrap());
        assert!(transport.pull().unwrap() > 0);
        assert!(!transport.is_idle());
        let mut seen = vec![];
        let delivered = transport.deliver(|source, target, flags, msg| {
            seen.push((source, target, flags, msg));
            Ok(())
        });
        assert_eq!(delivered, 3);
        seen.sort_by_key(|s| s.0);
        assert_eq!(seen[0].3, Incoming::Data(Payload::Aggregated((0..10).collect())));
        assert_eq!(seen[1].3, Incoming::Empty);
        assert_eq!(seen[2].3, Incoming::Barrier(vec![9, 9]));
        assert!(transport.is_idle());
        assert_eq!(channel.available_buffers(), 8);
    }

    #[test]
    fn rejected_transfers_stay_in_order() {
        let conf = conf();
        let plan = LogicalPlan::new(0, vec![0], vec![1]);
        let channel = LocalChannel::with_config(&conf);
        let mut transport = EdgeTransport::<u32>::new(plan, Box::new(channel.fork_local()), &conf).unwrap();
        for i in 0..3u32 {
            transport
                .forward(0, 1, MessageFlags::empty(), &[i])
                .unwrap();
        }
        transport.pull().unwrap();
        let mut accepted = vec![];
        assert_eq!(
            transport.deliver(|_, _, _, msg| {
                if accepted.len() == 1 {
                    return Err(msg);
                }
                accepted.push(msg);
                Ok(())
            }),
            1
        );
        transport.deliver(|_, _, _, msg| {
            accepted.push(msg);
            Ok(())
        });
        let values = accepted
            .into_iter()
            .map(|m| match m {
                Incoming::Data(p) => p.into_vec()[0],
                _ => unreachable!(),
            })
            .collect::<Vec<_>>();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn no_buffer_means_retry() {
        let conf = conf().with_buffer_pool_size(1);
        let plan = LogicalPlan::new(0, vec![0], vec![1]);
        let mut channel = LocalChannel::with_config(&conf);
        let mut transport = EdgeTransport::<u32>::new(plan, Box::new(channel.fork_local()), &conf).unwrap();
        let held = channel.try_acquire(1).unwrap();
        assert!(!transport.forward(0, 1, MessageFlags::empty(), &[1]).unwrap());
        for b in held {
            channel.release(b);
        }
        assert!(transport.forward(0, 1, MessageFlags::empty(), &[1]).unwrap());
    }

    #[test]
    fn foreign_source_is_a_protocol_error() {
        let conf = conf();
        let plan = LogicalPlan::new(0, vec![0], vec![1]);
        let channel = LocalChannel::with_config(&conf);
        let mut transport = EdgeTransport::<u32>::new(plan, Box::new(channel.fork_local()), &conf).unwrap();
        let mut sender = channel.fork_local();
        let buffer = DataBuffer::from_bytes(vec![0; 16]);
        sender
            .send(Envelope { edge: 0, source: 7, target: 1, buffer })
            .unwrap();
        assert!(transport.pull().unwrap_err().is_protocol());
    }

    #[test]
    fn close_deregisters_and_returns_buffers() {
        let conf = conf();
        let plan = LogicalPlan::new(0, vec![0], vec![1]);
        let channel = LocalChannel::with_config(&conf);
        let mut transport = EdgeTransport::<u32>::new(plan.clone(), Box::new(channel.fork_local()), &conf).unwrap();
        transport
            .forward(0, 1, MessageFlags::empty(), &[1, 2, 3])
            .unwrap();
        assert!(channel.available_buffers() < 8);
        transport.close();
        assert_eq!(channel.available_buffers(), 8);
        // the endpoint can be registered again;
        let again = EdgeTransport::<u32>::new(plan, Box::new(channel.fork_local()), &conf);
        assert!(again.is_ok());
    }
}
