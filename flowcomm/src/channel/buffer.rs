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

use std::fmt::{Debug, Formatter};

/// A fixed-capacity byte buffer moved through a channel.
///
/// Pooled buffers must go back to the channel they were acquired from through
/// [`Channel::release`](super::Channel::release);
pub struct DataBuffer {
    data: Vec<u8>,
    capacity: usize,
    pooled: bool,
}

impl DataBuffer {
    pub fn pooled(capacity: usize) -> Self {
        DataBuffer { data: Vec::new(), capacity, pooled: true }
    }

    /// A buffer created outside of any pool, dropped on release;
    pub fn transient(capacity: usize) -> Self {
        DataBuffer { data: Vec::with_capacity(capacity), capacity, pooled: false }
    }

    /// Wrap bytes which are already framed;
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let capacity = data.len();
        DataBuffer { data, capacity, pooled: false }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Append as many bytes of `bytes` as fit, returns the number written;
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        let size = std::cmp::min(self.remaining(), bytes.len());
        self.data.extend_from_slice(&bytes[..size]);
        size
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Debug for DataBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataBuffer({}/{}, pooled={})", self.data.len(), self.capacity, self.pooled)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_respects_capacity() {
        let mut buf = DataBuffer::pooled(4);
        assert_eq!(buf.write(&[1, 2, 3]), 3);
        assert_eq!(buf.write(&[4, 5, 6]), 1);
        assert_eq!(buf.remaining(), 0);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 4);
    }
}
