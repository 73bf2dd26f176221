//! Ranges and native iterators.

use std::rc::Rc;

use crate::{heap::HeapId, value::Value};

/// `range(start, stop, step)`; `step` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            i128::from(self.stop) - i128::from(self.start)
        } else {
            i128::from(self.start) - i128::from(self.stop)
        };
        if span <= 0 {
            return 0;
        }
        let step = i128::from(self.step).abs();
        ((span + step - 1) / step) as usize
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        Some(self.start + self.step * index as i64)
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

/// State of a native iterator.
///
/// Sequence and dict iterators read their source live by position, so
/// appends during iteration are observed the way the modeled language
/// observes them.
#[derive(Debug, Clone)]
pub(crate) enum ValueIter {
    /// List or tuple by index.
    Seq { source: HeapId, index: usize },
    /// Dict keys or set members by insertion position.
    Keys { source: HeapId, index: usize },
    Str { text: Rc<str>, offset: usize },
    Bytes { data: Rc<[u8]>, index: usize },
    Range { range: Range, index: usize },
    /// Items computed up front (`reversed`, `zip` over native sequences, dict views).
    Snapshot { items: Vec<Value>, index: usize },
    /// `enumerate(inner, start)`.
    Enumerate { inner: Value, count: i64 },
    /// `zip(*inners)`; stops at the first exhausted iterator.
    Zip { inners: Vec<Value> },
}

impl ValueIter {
    pub fn snapshot(items: Vec<Value>) -> Self {
        Self::Snapshot { items, index: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_len_and_membership_follow_step_sign() {
        let up = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(up.len(), 4);
        assert!(up.contains(9));
        assert!(!up.contains(10));
        let down = Range { start: 5, stop: -1, step: -2 };
        assert_eq!(down.len(), 3);
        assert_eq!(down.get(2), Some(1));
        assert!(!down.contains(0));
        assert_eq!(Range { start: 3, stop: 3, step: 1 }.len(), 0);
    }
}
