use std::collections::VecDeque;

use tracing::warn;
use typed_builder::TypedBuilder;

/// Tuples a node may hold back while blocked before the oldest are evicted.
pub const DEFAULT_BUFFER_CAPACITY: usize = 60_000;

#[derive(TypedBuilder, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    #[builder(default = DEFAULT_BUFFER_CAPACITY)]
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Bounded FIFO of stream tuples. Pushing onto a full buffer evicts the
/// oldest element.
#[derive(Clone, Debug)]
pub struct DataBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> DataBuffer<T> {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: config.capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `item`, returning the element evicted to make room, if any.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Inserts at `index` (clamped to the length), evicting the oldest
    /// element if the buffer was full.
    pub fn insert(&mut self, index: usize, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let mut index = index.min(self.items.len());
        let evicted = if self.items.len() >= self.capacity {
            index = index.saturating_sub(1);
            self.items.pop_front()
        } else {
            None
        };
        self.items.insert(index, item);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.items.remove(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter()
    }

    /// Combines `buffers` round robin: one element from each non-empty
    /// source in turn, keeping each source's own order. If the result
    /// exceeds `config.capacity`, the oldest entries are dropped.
    pub fn interleave(buffers: Vec<DataBuffer<T>>, config: BufferConfig) -> Self {
        let mut sources: Vec<VecDeque<T>> = buffers.into_iter().map(|b| b.items).collect();
        let total: usize = sources.iter().map(VecDeque::len).sum();
        let mut items = VecDeque::with_capacity(total);
        while items.len() < total {
            for source in sources.iter_mut() {
                if let Some(item) = source.pop_front() {
                    items.push_back(item);
                }
            }
        }
        if items.len() > config.capacity {
            let dropped = items.len() - config.capacity;
            warn!(dropped, capacity = config.capacity, "merged buffer over capacity");
            items.drain(..dropped);
        }
        Self {
            items,
            capacity: config.capacity,
        }
    }
}

impl<T> Default for DataBuffer<T> {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(capacity: usize, items: &[char]) -> DataBuffer<char> {
        let mut buffer = DataBuffer::new(BufferConfig::builder().capacity(capacity).build());
        for item in items {
            buffer.push(*item);
        }
        buffer
    }

    #[test]
    fn default_capacity() {
        assert_eq!(DataBuffer::<u8>::default().capacity(), DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut b = buffer(3, &['a', 'b', 'c']);
        assert_eq!(b.push('d'), Some('a'));
        assert_eq!(b.iter().copied().collect::<String>(), "bcd");
        assert_eq!(b.insert(0, 'z'), Some('b'));
        assert_eq!(b.iter().copied().collect::<String>(), "zcd");
        assert_eq!(b.remove(1), Some('c'));
        assert_eq!(b.pop(), Some('z'));
        b.clear();
        assert!(b.is_empty());
    }

    #[test]
    fn interleave_is_round_robin() {
        let merged = DataBuffer::interleave(
            vec![buffer(10, &['a', 'b']), buffer(10, &['c']), buffer(10, &[])],
            BufferConfig::default(),
        );
        assert_eq!(merged.iter().copied().collect::<String>(), "acb");

        let merged = DataBuffer::interleave(
            vec![buffer(10, &['a', 'b', 'c']), buffer(10, &['d', 'e'])],
            BufferConfig::builder().capacity(3).build(),
        );
        assert_eq!(merged.iter().copied().collect::<String>(), "bec");
    }
}
