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

use std::sync::{Arc, Mutex, MutexGuard};

use ahash::AHashMap;
use crossbeam_queue::ArrayQueue;
use flowcomm_common::channel::{self as mailbox, MessageReceiver, MessageSender};

use super::{Channel, DataBuffer, Envelope};
use crate::config::CommConfig;
use crate::errors::{BuildOpError, PullError, PushError};
use crate::{EdgeId, TaskId};

type Endpoint = (EdgeId, TaskId);

struct Mailbox {
    tx: MessageSender<Envelope>,
    rx: Option<MessageReceiver<Envelope>>,
}

struct Hub {
    buffer_size: usize,
    pool: ArrayQueue<DataBuffer>,
    mailboxes: Mutex<AHashMap<Endpoint, Mailbox>>,
}

impl Hub {
    fn mailboxes(&self) -> MutexGuard<AHashMap<Endpoint, Mailbox>> {
        match self.mailboxes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn mailbox<'a>(map: &'a mut AHashMap<Endpoint, Mailbox>, ep: Endpoint) -> &'a mut Mailbox {
        map.entry(ep).or_insert_with(|| {
            let (tx, rx) = mailbox::open(format!("edge[{}]-target[{}]", ep.0, ep.1));
            Mailbox { tx, rx: Some(rx) }
        })
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        let mut map = self.mailboxes();
        for (_, mut mailbox) in map.drain() {
            mailbox.tx.close();
        }
    }
}

/// In-process channel: one crossbeam mailbox per `(edge, target)` endpoint and a
/// fixed pool of buffers shared by every handle forked from the same channel.
///
/// Each worker uses its own handle; handles can live on different threads.
pub struct LocalChannel {
    hub: Arc<Hub>,
    senders: AHashMap<Endpoint, MessageSender<Envelope>>,
    receivers: AHashMap<Endpoint, MessageReceiver<Envelope>>,
}

impl LocalChannel {
    pub fn new(buffer_size: usize, pool_size: usize) -> Self {
        assert!(pool_size > 0, "buffer pool can't be empty;");
        let pool = ArrayQueue::new(pool_size);
        for _ in 0..pool_size {
            let _ = pool.push(DataBuffer::pooled(buffer_size));
        }
        let hub = Hub { buffer_size, pool, mailboxes: Mutex::new(AHashMap::new()) };
        LocalChannel { hub: Arc::new(hub), senders: AHashMap::new(), receivers: AHashMap::new() }
    }

    pub fn with_config(conf: &CommConfig) -> Self {
        LocalChannel::new(conf.buffer_size(), conf.buffer_pool_size())
    }

    pub fn fork_local(&self) -> LocalChannel {
        LocalChannel { hub: self.hub.clone(), senders: AHashMap::new(), receivers: AHashMap::new() }
    }

    /// Buffers currently in the shared pool;
    pub fn available_buffers(&self) -> usize {
        self.hub.pool.len()
    }

    pub fn pool_size(&self) -> usize {
        self.hub.pool.capacity()
    }
}

impl Channel for LocalChannel {
    fn register(&mut self, edge: EdgeId, target: TaskId) -> Result<(), BuildOpError> {
        let mut map = self.hub.mailboxes();
        let mailbox = Hub::mailbox(&mut map, (edge, target));
        if let Some(rx) = mailbox.rx.take() {
            debug!("register endpoint edge[{}]-target[{}];", edge, target);
            self.receivers.insert((edge, target), rx);
            Ok(())
        } else {
            BuildOpError::invalid_plan(format!("endpoint edge[{}]-target[{}] registered twice", edge, target))
        }
    }

    fn deregister(&mut self, edge: EdgeId, target: TaskId) {
        if let Some(mut tx) = self.senders.remove(&(edge, target)) {
            tx.close();
        }
        if self.receivers.remove(&(edge, target)).is_some() {
            debug!("deregister endpoint edge[{}]-target[{}];", edge, target);
            let mut map = self.hub.mailboxes();
            if let Some(mut mailbox) = map.remove(&(edge, target)) {
                mailbox.tx.close();
            }
        }
    }

    fn buffer_size(&self) -> usize {
        self.hub.buffer_size
    }

    fn can_send(&self) -> bool {
        !self.hub.pool.is_empty()
    }

    fn try_acquire(&mut self, count: usize) -> Option<Vec<DataBuffer>> {
        let pool = &self.hub.pool;
        if count > pool.capacity() {
            // can never be served by the pool;
            trace!("acquire {} transient buffers;", count);
            return Some((0..count).map(|_| DataBuffer::transient(self.hub.buffer_size)).collect());
        }
        let mut acquired = Vec::with_capacity(count);
        while acquired.len() < count {
            if let Some(buf) = pool.pop() {
                acquired.push(buf);
            } else {
                for buf in acquired {
                    let _ = pool.push(buf);
                }
                return None;
            }
        }
        Some(acquired)
    }

    fn send(&mut self, envelope: Envelope) -> Result<(), PushError> {
        let ep = (envelope.edge, envelope.target);
        if !self.senders.contains_key(&ep) {
            let mut map = self.hub.mailboxes();
            let tx = Hub::mailbox(&mut map, ep).tx.clone();
            self.senders.insert(ep, tx);
        }
        let result = match self.senders.get_mut(&ep) {
            Some(tx) => tx.send(envelope),
            None => Err(envelope),
        };
        if let Err(envelope) = result {
            self.release(envelope.buffer);
            return Err(PushError::Disconnected { edge: ep.0, target: ep.1 });
        }
        Ok(())
    }

    fn receive(&mut self, edge: EdgeId, target: TaskId) -> Result<Option<Envelope>, PullError> {
        if let Some(rx) = self.receivers.get(&(edge, target)) {
            Ok(rx.try_recv()?)
        } else {
            Err(PullError::Unregistered { edge, target })
        }
    }

    fn release(&mut self, mut buffer: DataBuffer) {
        if buffer.is_pooled() {
            buffer.clear();
            if self.hub.pool.push(buffer).is_err() {
                warn!("buffer pool overflow, a foreign buffer was released;");
            }
        }
    }

    fn fork(&self) -> Box<dyn Channel> {
        Box::new(self.fork_local())
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        for (_, tx) in self.senders.iter_mut() {
            tx.close();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn envelope(ch: &mut LocalChannel, source: TaskId, target: TaskId, byte: u8) -> Envelope {
        let mut buffer = ch.try_acquire(1).unwrap().pop().unwrap();
        buffer.write(&[byte]);
        Envelope { edge: 0, source, target, buffer }
    }

    #[test]
    fn send_between_handles() {
        let mut a = LocalChannel::new(64, 4);
        let mut b = a.fork_local();
        b.register(0, 1).unwrap();
        for i in 0..3 {
            let env = envelope(&mut a, 0, 1, i);
            a.send(env).unwrap();
        }
        assert_eq!(a.available_buffers(), 1);
        for i in 0..3 {
            let env = b.receive(0, 1).unwrap().unwrap();
            assert_eq!(env.buffer.as_slice(), &[i]);
            b.release(env.buffer);
        }
        assert!(b.receive(0, 1).unwrap().is_none());
        assert_eq!(a.available_buffers(), 4);
    }

    #[test]
    fn acquire_is_all_or_nothing() {
        let mut ch = LocalChannel::new(64, 4);
        let three = ch.try_acquire(3).unwrap();
        assert!(ch.try_acquire(2).is_none());
        assert_eq!(ch.available_buffers(), 1);
        for buf in three {
            ch.release(buf);
        }
        assert!(ch.can_send());
        // more than the whole pool;
        let big = ch.try_acquire(5).unwrap();
        assert_eq!(big.len(), 5);
        assert!(big.iter().all(|b| !b.is_pooled()));
        for buf in big {
            ch.release(buf);
        }
        assert_eq!(ch.available_buffers(), 4);
    }

    #[test]
    fn register_twice_fails() {
        let mut ch = LocalChannel::new(64, 1);
        ch.register(2, 3).unwrap();
        assert!(ch.fork_local().register(2, 3).is_err());
        ch.deregister(2, 3);
        assert!(ch.receive(2, 3).is_err());
        ch.register(2, 3).unwrap();
    }

    #[test]
    fn send_after_deregister_is_disconnected() {
        let mut a = LocalChannel::new(64, 2);
        let mut b = a.fork_local();
        b.register(0, 1).unwrap();
        let env = envelope(&mut a, 0, 1, 1);
        a.send(env).unwrap();
        b.deregister(0, 1);
        let env = envelope(&mut a, 0, 1, 2);
        let err = a.send(env).unwrap_err();
        assert!(matches!(err, PushError::Disconnected { edge: 0, target: 1 }));
    }
}
