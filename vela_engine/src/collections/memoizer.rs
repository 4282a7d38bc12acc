use std::sync::{Arc, Mutex};

struct MemoizedState<I: Iterator> {
    source: I,
    cache: Vec<I::Item>,
    exhausted: bool,
}

/// Read-through cache over a lazy sequence. The source is pulled at most once
/// per element, every cursor replays the shared cache before advancing the
/// source. Used where two consumers need independent passes over one lazy
/// stream, e.g. the subscription reader walking tradeable dates while also
/// looking one date ahead for factor file events.
pub struct MemoizedEnumerable<I: Iterator>
where
    I::Item: Clone,
{
    inner: Mutex<MemoizedState<I>>,
}

impl<I: Iterator> MemoizedEnumerable<I>
where
    I::Item: Clone,
{
    pub fn new(source: I) -> Arc<Self> {
        Arc::new(MemoizedEnumerable {
            inner: Mutex::new(MemoizedState {
                source,
                cache: Vec::new(),
                exhausted: false,
            }),
        })
    }

    fn get(&self, index: usize) -> Option<I::Item> {
        let mut state = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while state.cache.len() <= index && !state.exhausted {
            match state.source.next() {
                Some(item) => state.cache.push(item),
                None => state.exhausted = true,
            }
        }
        state.cache.get(index).cloned()
    }

}

pub struct MemoizedCursor<I: Iterator>
where
    I::Item: Clone,
{
    owner: Arc<MemoizedEnumerable<I>>,
    index: usize,
}

impl<I: Iterator> MemoizedCursor<I>
where
    I::Item: Clone,
{
    /// A fresh cursor starting at the beginning of the shared sequence.
    pub fn new(owner: Arc<MemoizedEnumerable<I>>) -> Self {
        MemoizedCursor { owner, index: 0 }
    }

    /// The element this cursor would yield next, without consuming it.
    pub fn peek(&self) -> Option<I::Item> {
        self.owner.get(self.index)
    }

    /// Look `offset` elements past the cursor position without consuming.
    pub fn peek_ahead(&self, offset: usize) -> Option<I::Item> {
        self.owner.get(self.index + offset)
    }
}

impl<I: Iterator> Iterator for MemoizedCursor<I>
where
    I::Item: Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let item = self.owner.get(self.index);
        if item.is_some() {
            self.index += 1;
        }
        item
    }
}
