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

use crate::errors::IOResult;

/// Group adjacent records with equal keys, the input should be sorted by key;
pub fn group_by_key<K, V, I>(records: I) -> GroupByKey<K, V, I>
where
    K: PartialEq,
    I: Iterator<Item = IOResult<(K, V)>>,
{
    GroupByKey { records, head: None, done: false }
}

pub struct GroupByKey<K, V, I> {
    records: I,
    head: Option<(K, V)>,
    done: bool,
}

impl<K, V, I> Iterator for GroupByKey<K, V, I>
where
    K: PartialEq,
    I: Iterator<Item = IOResult<(K, V)>>,
{
    type Item = IOResult<(K, Vec<V>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (key, first) = match self.head.take() {
            Some(head) => head,
            None => match self.records.next()? {
                Ok(record) => record,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            },
        };
        let mut values = vec![first];
        loop {
            match self.records.next() {
                Some(Ok((k, v))) => {
                    if k == key {
                        values.push(v);
                    } else {
                        self.head = Some((k, v));
                        break;
                    }
                }
                Some(Err(e)) => {
                    // the group is incomplete;
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        Some(Ok((key, values)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn group_sorted_records() {
        let records = vec![(1, 'a'), (1, 'b'), (2, 'c'), (3, 'd'), (3, 'e'), (3, 'f')];
        let groups = group_by_key(records.into_iter().map(Ok))
            .collect::<IOResult<Vec<_>>>()
            .unwrap();
        assert_eq!(groups, vec![(1, vec!['a', 'b']), (2, vec!['c']), (3, vec!['d', 'e', 'f'])]);
    }

    #[test]
    fn empty_input() {
        let records: Vec<IOResult<(u32, u32)>> = vec![];
        assert!(group_by_key(records.into_iter()).next().is_none());
    }
}
