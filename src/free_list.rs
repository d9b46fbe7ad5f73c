/// Fixed capacity slot storage. A value keeps its index for as long as it is stored, and freed
/// slots are reused lowest index first.
pub struct FreeList<T> {
    len: usize,
    inner: Vec<Option<T>>,
}

impl<T> FreeList<T> {
    pub fn new(capacity: usize) -> Self {
        let mut inner = Vec::with_capacity(capacity);
        inner.resize_with(capacity, || None);
        Self { len: 0, inner }
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn capacity(&self) -> usize {
        self.inner.len()
    }
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity()
    }
    /// Stores `value` in the first free slot, returning its index, or `None` when full.
    pub fn insert(&mut self, value: T) -> Option<usize> {
        let index = self.inner.iter().position(Option::is_none)?;
        self.inner[index] = Some(value);
        self.len += 1;
        Some(index)
    }
    pub fn remove(&mut self, index: usize) -> Option<T> {
        let value = self.inner.get_mut(index)?.take()?;
        self.len -= 1;
        Some(value)
    }
    pub fn get(&self, index: usize) -> Option<&T> {
        self.inner.get(index).and_then(Option::as_ref)
    }
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.inner.get_mut(index).and_then(Option::as_mut)
    }
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.inner
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }
}
