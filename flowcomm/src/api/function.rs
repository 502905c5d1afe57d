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

use std::cmp::Ordering;
use std::sync::Arc;

/// Binary combine function of reduce operations.
///
/// Records of different sources are combined in arrival order, so the function
/// should be associative and commutative for the result to be deterministic;
pub trait ReduceFunction<T>: Send + Sync {
    fn reduce(&self, left: T, right: T) -> T;
}

impl<T, F: Fn(T, T) -> T + Send + Sync> ReduceFunction<T> for F {
    fn reduce(&self, left: T, right: T) -> T {
        (self)(left, right)
    }
}

/// Total order used to sort spilled records, keys of keyed operations and join sides;
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

pub fn comparator<T, F>(func: F) -> Comparator<T>
where
    F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
{
    Arc::new(func)
}

pub fn natural_order<T: Ord + 'static>() -> Comparator<T> {
    Arc::new(|a: &T, b: &T| a.cmp(b))
}

/// Lift a key comparator to keyed `(key, value)` records;
pub fn by_key<K: 'static, V: 'static>(key_cmp: Comparator<K>) -> Comparator<(K, V)> {
    Arc::new(move |a: &(K, V), b: &(K, V)| (key_cmp)(&a.0, &b.0))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn closures_are_reduce_functions() {
        let sum: Arc<dyn ReduceFunction<u64>> = Arc::new(|a: u64, b: u64| a + b);
        assert_eq!(sum.reduce(3, 4), 7);
    }

    #[test]
    fn keyed_order_ignores_values() {
        let cmp = by_key::<i32, &str>(natural_order());
        assert_eq!(cmp(&(1, "z"), &(2, "a")), Ordering::Less);
        assert_eq!(cmp(&(2, "z"), &(2, "a")), Ordering::Equal);
        let rev = comparator(|a: &i32, b: &i32| b.cmp(a));
        assert_eq!(rev(&1, &2), Ordering::Greater);
    }
}
