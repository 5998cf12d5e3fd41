//! 音符注册表模块
//!
//! [`NoteRegistry`] 独占所有存活的 [`NoteEntry`]；表现层只持有 [`NoteId`]。
//! 所有通知都在执行修改的线程上同步触发，回调只拿到共享引用，
//! 因此无法在通知过程中再次修改同一对象。

use crate::structure::{NoteData, NoteId};
use std::fmt;

pub type NoteObserver = Box<dyn FnMut(&NoteData, &NoteData)>;
pub type EntryCallback = Box<dyn FnMut(&NoteEntry)>;

/// 持有一个音符当前值的可变单元，身份由 [`NoteId`] 决定。
///
/// 两个值相等的条目仍然是两个不同的音符。
pub struct NoteEntry {
    id: NoteId,
    data: NoteData,
    observers: Vec<NoteObserver>,
}

impl NoteEntry {
    fn new(data: NoteData) -> Self {
        Self {
            id: NoteId::next(),
            data,
            observers: Vec::new(),
        }
    }

    pub fn id(&self) -> NoteId {
        self.id
    }

    pub fn get(&self) -> NoteData {
        self.data
    }

    /// 替换当前值。值未变化时不通知，返回 `false`。
    pub fn set(&mut self, data: NoteData) -> bool {
        if data == self.data {
            return false;
        }
        let old = std::mem::replace(&mut self.data, data);
        for observer in &mut self.observers {
            observer(&old, &self.data);
        }
        true
    }

    /// 读取-变换-写回。变换失败时条目保持原值，错误原样返回。
    pub fn modify<F, E>(&mut self, transform: F) -> Result<bool, E>
    where
        F: FnOnce(&NoteData) -> Result<NoteData, E>,
    {
        let next = transform(&self.data)?;
        Ok(self.set(next))
    }

    /// 订阅值变化，回调参数为 (旧值, 新值)，按注册顺序调用。
    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(&NoteData, &NoteData) + 'static,
    {
        self.observers.push(Box::new(observer));
    }
}

impl fmt::Debug for NoteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoteEntry")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// 全部音符的有序集合，迭代顺序即插入顺序。
#[derive(Default)]
pub struct NoteRegistry {
    entries: Vec<NoteEntry>,
    added: Vec<EntryCallback>,
    removed: Vec<EntryCallback>,
}

impl NoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, data: NoteData) -> NoteId {
        let entry = NoteEntry::new(data);
        let id = entry.id;
        self.entries.push(entry);
        let Some(entry) = self.entries.last() else {
            return id;
        };
        log::debug!("registered note {:?}: {:?}", entry.id, entry.data);
        for callback in &mut self.added {
            callback(entry);
        }
        id
    }

    /// 移除音符并返回其最后的值。不存在时为无操作（重复删除是正常的 UI 竞争）。
    pub fn unregister(&mut self, id: NoteId) -> Option<NoteData> {
        let Some(index) = self.index_of(id) else {
            log::debug!("unregister ignored, note {:?} is not live", id);
            return None;
        };
        let entry = self.entries.remove(index);
        log::debug!("unregistered note {:?}", id);
        for callback in &mut self.removed {
            callback(&entry);
        }
        Some(entry.data)
    }

    pub fn on_added<F>(&mut self, callback: F)
    where
        F: FnMut(&NoteEntry) + 'static,
    {
        self.added.push(Box::new(callback));
    }

    pub fn on_removed<F>(&mut self, callback: F)
    where
        F: FnMut(&NoteEntry) + 'static,
    {
        self.removed.push(Box::new(callback));
    }

    pub fn entries(&self) -> impl Iterator<Item = &NoteEntry> + '_ {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<NoteId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: NoteId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn get(&self, id: NoteId) -> Option<&NoteEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: NoteId) -> Option<&mut NoteEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// 通过条目修改音符，只触发条目级通知。
    ///
    /// 返回 `Ok(false)` 表示音符已不存在；变换失败时条目不变。
    pub fn modify<F, E>(&mut self, id: NoteId, transform: F) -> Result<bool, E>
    where
        F: FnOnce(&NoteData) -> Result<NoteData, E>,
    {
        match self.get_mut(id) {
            Some(entry) => {
                entry.modify(transform)?;
                Ok(true)
            }
            None => {
                log::debug!("modify ignored, note {:?} is not live", id);
                Ok(false)
            }
        }
    }

    /// 移除全部音符，按插入顺序触发移除通知。
    pub fn clear(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            for callback in &mut self.removed {
                callback(entry);
            }
        }
        log::debug!("cleared {} notes", entries.len());
    }

    /// 查找覆盖给定格子的音符，重叠时取最后插入（最上层）的那个。
    pub fn note_at(&self, beat: f64, pitch: u8) -> Option<NoteId> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.data.pitch() == pitch && e.data.covers(beat))
            .map(|e| e.id)
    }

    fn index_of(&self, id: NoteId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }
}

impl fmt::Debug for NoteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoteRegistry")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NoteError;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn note(pitch: u8, start: f64) -> NoteData {
        NoteData::new(pitch, start, start + 1.0, 80).unwrap()
    }

    #[test]
    fn register_appends_exactly_once() {
        let mut registry = NoteRegistry::new();
        let first = registry.register(note(10, 0.0));
        let second = registry.register(note(12, 1.0));
        assert_eq!(registry.ids(), vec![first, second]);
        assert_eq!(registry.ids().iter().filter(|&&id| id == second).count(), 1);
    }

    #[test]
    fn equal_values_are_distinct_entries() {
        let mut registry = NoteRegistry::new();
        let a = registry.register(note(10, 0.0));
        let b = registry.register(note(10, 0.0));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn unregistered_entry_never_reappears() {
        let mut registry = NoteRegistry::new();
        let a = registry.register(note(10, 0.0));
        let b = registry.register(note(11, 0.0));
        assert_eq!(registry.unregister(a), Some(note(10, 0.0)));
        assert!(!registry.contains(a));
        assert!(registry.entries().all(|e| e.id() != a));
        registry.register(note(10, 0.0));
        assert!(registry.entries().all(|e| e.id() != a));
        assert!(registry.contains(b));
    }

    #[test]
    fn unregister_absent_is_silent_noop() {
        let mut registry = NoteRegistry::new();
        let removed = Rc::new(Cell::new(0));
        let counter = removed.clone();
        registry.on_removed(move |_| counter.set(counter.get() + 1));

        let id = registry.register(note(1, 0.0));
        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert_eq!(removed.get(), 1);
    }

    #[test]
    fn structural_observers_run_in_registration_order() {
        let mut registry = NoteRegistry::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let log = log.clone();
            registry.on_added(move |entry| log.borrow_mut().push((tag, entry.id())));
        }
        let id = registry.register(note(5, 0.0));
        assert_eq!(*log.borrow(), vec![("first", id), ("second", id)]);
    }

    #[test]
    fn added_callback_sees_entry_in_place() {
        let mut registry = NoteRegistry::new();
        let seen = Rc::new(RefCell::new(None));
        let slot = seen.clone();
        registry.on_added(move |entry| *slot.borrow_mut() = Some(entry.get()));
        registry.register(note(7, 2.0));
        assert_eq!(*seen.borrow(), Some(note(7, 2.0)));
    }

    #[test]
    fn notification_balance_matches_live_count() {
        let mut registry = NoteRegistry::new();
        let balance = Rc::new(Cell::new(0i64));
        let up = balance.clone();
        registry.on_added(move |_| up.set(up.get() + 1));
        let down = balance.clone();
        registry.on_removed(move |_| down.set(down.get() - 1));

        let mut rng = fastrand::Rng::with_seed(0x5eed);
        let mut live = Vec::new();
        for _ in 0..500 {
            if live.is_empty() || rng.bool() {
                live.push(registry.register(note(rng.u8(0..88), rng.f64() * 16.0)));
            } else if rng.u8(0..4) == 0 {
                // 重复删除同一条目
                let id = live[rng.usize(..live.len())];
                registry.unregister(id);
                registry.unregister(id);
                live.retain(|&l| l != id);
            } else {
                let id = live.swap_remove(rng.usize(..live.len()));
                registry.unregister(id);
            }
            assert_eq!(balance.get(), registry.len() as i64);
        }
        registry.clear();
        assert_eq!(balance.get(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn entry_observers_receive_old_and_new() {
        let mut registry = NoteRegistry::new();
        let id = registry.register(note(10, 0.0));
        let changes = Rc::new(RefCell::new(Vec::new()));
        let sink = changes.clone();
        registry
            .get_mut(id)
            .unwrap()
            .subscribe(move |old, new| sink.borrow_mut().push((*old, *new)));

        let changed = registry.modify(id, |n| n.with_velocity(20)).unwrap();
        assert!(changed);
        let changes = changes.borrow();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0.velocity(), 80);
        assert_eq!(changes[0].1.velocity(), 20);
    }

    #[test]
    fn entry_observers_run_in_subscription_order() {
        let mut registry = NoteRegistry::new();
        let id = registry.register(note(10, 0.0));
        let order = Rc::new(RefCell::new(Vec::new()));
        let entry = registry.get_mut(id).unwrap();
        for tag in 0..3 {
            let order = order.clone();
            entry.subscribe(move |_, new| order.borrow_mut().push((tag, new.pitch())));
        }
        entry.set(note(11, 0.0));
        assert_eq!(*order.borrow(), vec![(0, 11), (1, 11), (2, 11)]);
    }

    #[test]
    fn modify_does_not_fire_structural_callbacks() {
        let mut registry = NoteRegistry::new();
        let id = registry.register(note(10, 0.0));
        let structural = Rc::new(Cell::new(0));
        let added = structural.clone();
        registry.on_added(move |_| added.set(added.get() + 1));
        let removed = structural.clone();
        registry.on_removed(move |_| removed.set(removed.get() + 1));
        let updates = Rc::new(Cell::new(0));
        let counter = updates.clone();
        registry
            .get_mut(id)
            .unwrap()
            .subscribe(move |_, _| counter.set(counter.get() + 1));

        assert_eq!(registry.modify(id, |n| n.with_pitch(12)), Ok(true));
        assert_eq!(updates.get(), 1);
        assert_eq!(structural.get(), 0);
        assert_eq!(registry.ids(), vec![id]);
    }

    #[test]
    fn failed_transform_leaves_entry_untouched() {
        let mut registry = NoteRegistry::new();
        let id = registry.register(note(10, 0.0));
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        registry
            .get_mut(id)
            .unwrap()
            .subscribe(move |_, _| counter.set(counter.get() + 1));

        let result = registry.modify(id, |n| n.with_end(-3.0));
        assert!(matches!(result, Err(NoteError::InvalidSpan { .. })));
        assert_eq!(registry.get(id).unwrap().get(), note(10, 0.0));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn modify_missing_entry_is_benign() {
        let mut registry = NoteRegistry::new();
        let id = registry.register(note(10, 0.0));
        registry.unregister(id);
        assert_eq!(registry.modify(id, |n| n.with_pitch(3)), Ok(false));
    }

    #[test]
    fn set_with_equal_value_does_not_notify() {
        let mut registry = NoteRegistry::new();
        let id = registry.register(note(10, 0.0));
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let entry = registry.get_mut(id).unwrap();
        entry.subscribe(move |_, _| counter.set(counter.get() + 1));
        assert!(!entry.set(note(10, 0.0)));
        assert!(entry.set(note(11, 0.0)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn note_at_prefers_topmost() {
        let mut registry = NoteRegistry::new();
        let below = registry.register(NoteData::new(20, 0.0, 4.0, 50).unwrap());
        let above = registry.register(NoteData::new(20, 1.0, 2.0, 50).unwrap());
        assert_eq!(registry.note_at(1.5, 20), Some(above));
        assert_eq!(registry.note_at(3.0, 20), Some(below));
        assert_eq!(registry.note_at(4.0, 20), None);
        assert_eq!(registry.note_at(1.5, 21), None);
    }
}
