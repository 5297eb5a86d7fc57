/// Integer-keyed slot arena with LIFO id reuse.
///
/// Ids start at 1 so that 0 stays free for one-way sends. A freed id is only
/// handed out again after its value has been removed.
#[derive(Debug)]
pub(crate) struct SlotTable<T> {
    slots: Vec<Option<T>>,
    free: Vec<u64>,
    live: usize,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> SlotTable<T> {
    pub fn insert(&mut self, value: T) -> u64 {
        self.live += 1;
        if let Some(id) = self.free.pop() {
            if let Some(slot) = self.slot_mut(id) {
                *slot = Some(value);
                return id;
            }
        }
        self.slots.push(Some(value));
        self.slots.len() as u64
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut T> {
        self.slot_mut(id)?.as_mut()
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        let value = self.slot_mut(id)?.take()?;
        self.live -= 1;
        self.free.push(id);
        Some(value)
    }

    /// Id of the first live value matching `pred`.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<u64> {
        self.iter().find(|(_, value)| pred(value)).map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index as u64 + 1, value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|value| (index as u64 + 1, value)))
    }

    pub fn ids(&self) -> Vec<u64> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    fn slot_mut(&mut self, id: u64) -> Option<&mut Option<T>> {
        let index = usize::try_from(id.checked_sub(1)?).ok()?;
        self.slots.get_mut(index)
    }
}
