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


//! Unbounded mailboxes used by the in-process transport; every registered
//! endpoint owns one [`MessageReceiver`], every peer sending to it holds a clone of
//! the [`MessageSender`].
//!
//! Senders are expected to be closed explicitly. A sender dropped while still open
//! poisons the mailbox, and the receiver reports an unexpected eof once the
//! remaining messages were taken.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecvError {
    /// All senders were closed properly;
    Eof,
    /// Some sender was dropped without being closed;
    UnexpectedEof,
}

impl RecvError {
    pub fn is_eof(&self) -> bool {
        matches!(self, RecvError::Eof)
    }
}

struct MailboxState {
    name: String,
    poisoned: AtomicBool,
}

pub struct MessageSender<T> {
    state: Arc<MailboxState>,
    inner: Option<Sender<T>>,
    sent: usize,
}

pub struct MessageReceiver<T> {
    state: Arc<MailboxState>,
    inner: Receiver<T>,
}

/// Open an unbounded mailbox, `name` identifies it in logs;
pub fn open<T: Send, S: Into<String>>(name: S) -> (MessageSender<T>, MessageReceiver<T>) {
    let state = Arc::new(MailboxState { name: name.into(), poisoned: AtomicBool::new(false) });
    let (tx, rx) = crossbeam_channel::unbounded::<T>();
    trace!("open mailbox {};", state.name);
    (MessageSender { state: state.clone(), inner: Some(tx), sent: 0 }, MessageReceiver { state, inner: rx })
}

impl<T> MessageSender<T> {
    /// Send a message, the message is given back if the mailbox is gone or this
    /// sender was closed;
    pub fn send(&mut self, message: T) -> Result<(), T> {
        match self.inner.as_ref() {
            Some(tx) => {
                tx.send(message).map_err(|e| e.into_inner())?;
                self.sent += 1;
                Ok(())
            }
            None => Err(message),
        }
    }

    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            trace!("close sender of mailbox {} after {} messages;", self.state.name, self.sent);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }
}

impl<T> Clone for MessageSender<T> {
    fn clone(&self) -> Self {
        MessageSender { state: self.state.clone(), inner: self.inner.clone(), sent: 0 }
    }
}

impl<T> Drop for MessageSender<T> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!("dropping an unclosed sender of mailbox {};", self.state.name);
            self.state.poisoned.store(true, Ordering::SeqCst);
        }
    }
}

impl<T> MessageReceiver<T> {
    /// Never blocks, messages still in the mailbox are returned before any error;
    pub fn try_recv(&self) -> Result<Option<T>, RecvError> {
        match self.inner.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) if self.state.poisoned.load(Ordering::SeqCst) => {
                Err(RecvError::UnexpectedEof)
            }
            Err(TryRecvError::Disconnected) => Err(RecvError::Eof),
        }
    }

    /// Number of messages waiting in the mailbox;
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }
}
