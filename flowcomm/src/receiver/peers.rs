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

use nohash_hasher::IntSet;

use crate::TaskId;

/// A set of source tasks, compact for the usual cases where no source or only
/// one source, or a contiguous range of sources, finished.
#[derive(Clone, Debug)]
pub enum PeerSet {
    Empty,
    One(TaskId),
    /// Half-open range `[l, r)`;
    Range(TaskId, TaskId),
    Partial(IntSet<TaskId>),
}

impl Default for PeerSet {
    fn default() -> Self {
        PeerSet::Empty
    }
}

impl PeerSet {
    pub fn empty() -> Self {
        PeerSet::Empty
    }

    /// Add a peer, returns `false` if it was already in the set;
    pub fn add(&mut self, peer: TaskId) -> bool {
        if self.contains(peer) {
            return false;
        }
        match self {
            PeerSet::Empty => *self = PeerSet::One(peer),
            PeerSet::One(a) => {
                let a = *a;
                if peer == a + 1 {
                    *self = PeerSet::Range(a, peer + 1);
                } else if peer + 1 == a {
                    *self = PeerSet::Range(peer, a + 1);
                } else {
                    let mut set = IntSet::default();
                    set.insert(a);
                    set.insert(peer);
                    *self = PeerSet::Partial(set);
                }
            }
            PeerSet::Range(l, r) => {
                if peer == *r {
                    *r += 1;
                } else if peer + 1 == *l {
                    *l -= 1;
                } else {
                    let mut set = (*l..*r).collect::<IntSet<_>>();
                    set.insert(peer);
                    *self = PeerSet::Partial(set);
                }
            }
            PeerSet::Partial(set) => {
                set.insert(peer);
            }
        }
        true
    }

    pub fn contains(&self, peer: TaskId) -> bool {
        match self {
            PeerSet::Empty => false,
            PeerSet::One(id) => *id == peer,
            PeerSet::Range(l, r) => peer >= *l && peer < *r,
            PeerSet::Partial(set) => set.contains(&peer),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            PeerSet::Empty => 0,
            PeerSet::One(_) => 1,
            PeerSet::Range(l, r) => (*r - *l) as usize,
            PeerSet::Partial(set) => set.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        *self = PeerSet::Empty;
    }
}

impl Display for PeerSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerSet::Empty => write!(f, "P[]"),
            PeerSet::One(x) => write!(f, "P[{}]", x),
            PeerSet::Range(l, r) => write!(f, "P[{}..{}]", l, r),
            PeerSet::Partial(p) => {
                let mut peers = p.iter().copied().collect::<Vec<_>>();
                peers.sort_unstable();
                write!(f, "P{:?}", peers)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grow_as_range() {
        let mut set = PeerSet::empty();
        assert!(set.add(3));
        assert!(set.add(4));
        assert!(set.add(2));
        assert!(!set.add(3));
        assert_eq!(set.to_string(), "P[2..5]");
        assert_eq!(set.len(), 3);
        assert!(set.contains(4));
        assert!(!set.contains(5));
    }

    #[test]
    fn fall_back_to_partial() {
        let mut set = PeerSet::empty();
        set.add(0);
        set.add(1);
        set.add(7);
        assert_eq!(set.len(), 3);
        assert_eq!(set.to_string(), "P[0, 1, 7]");
        set.clear();
        assert!(set.is_empty());
        assert!(!set.contains(0));
    }
}
