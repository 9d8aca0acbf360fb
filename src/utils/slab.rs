/// Vector-backed storage with stable keys and a free list.
///
/// Keys of removed entries are reused by later insertions, so callers must
/// not hold on to a key past the removal of its entry.
pub(crate) struct Slab<T> {
    entries: Vec<Option<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Slab<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, item: T) -> usize {
        self.len += 1;

        if let Some(key) = self.free.pop() {
            self.entries[key] = Some(item);
            return key;
        }

        self.entries.push(Some(item));
        self.entries.len() - 1
    }

    pub(crate) fn remove(&mut self, key: usize) -> Option<T> {
        let item = self.entries.get_mut(key)?.take()?;
        self.free.push(key);
        self.len -= 1;

        Some(item)
    }

    pub(crate) fn get(&self, key: usize) -> Option<&T> {
        self.entries.get(key)?.as_ref()
    }

    pub(crate) fn get_mut(&mut self, key: usize) -> Option<&mut T> {
        self.entries.get_mut(key)?.as_mut()
    }
}
