/// A local list whose removals are applied immediately and rolled back when
/// the authoritative side refuses them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimisticList<T> {
    items: Vec<T>,
}

impl<T> OptimisticList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replaces the local copy with a fresh server listing.
    pub fn replace(&mut self, items: Vec<T>) {
        self.items = items;
    }

    /// Removes the first element matching `matches`, then runs `confirm`
    /// against the already-updated list. On failure the element goes back to
    /// its original index and the error is returned.
    pub fn remove_with<R, E>(
        &mut self,
        matches: impl Fn(&T) -> bool,
        confirm: impl FnOnce(&[T]) -> Result<R, E>,
    ) -> Result<R, E> {
        let removed = self
            .items
            .iter()
            .position(|item| matches(item))
            .map(|index| (index, self.items.remove(index)));
        match confirm(&self.items) {
            Ok(value) => Ok(value),
            Err(err) => {
                if let Some((index, item)) = removed {
                    self.items.insert(index.min(self.items.len()), item);
                }
                Err(err)
            }
        }
    }
}
