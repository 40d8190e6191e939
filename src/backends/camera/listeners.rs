// SPDX-License-Identifier: GPL-3.0-only

//! Observer list shared by devices and managers
//!
//! Listeners are held weakly: registering never extends a listener's
//! lifetime, and dropped listeners are skipped during fan-out.

use std::sync::{Arc, Weak};

/// Ordered set of weakly held listeners
pub struct ListenerSet<L: ?Sized> {
    entries: Vec<Weak<L>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener; registering the same listener twice notifies it twice
    ///
    /// Entries of listeners that have since been dropped are discarded.
    pub fn add(&mut self, listener: Weak<L>) {
        self.prune();
        self.entries.push(listener);
    }

    /// Remove the first entry pointing at `listener`
    ///
    /// Returns `false` if it was not registered.
    pub fn remove(&mut self, listener: &Arc<L>) -> bool {
        self.prune();
        let target = Arc::as_ptr(listener).cast::<()>();
        match self
            .entries
            .iter()
            .position(|entry| entry.as_ptr().cast::<()>() == target)
        {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Call `f` on every live listener in registration order
    pub fn for_each(&self, mut f: impl FnMut(&L)) {
        for listener in self.entries.iter().filter_map(Weak::upgrade) {
            f(&listener);
        }
    }

    fn prune(&mut self) {
        self.entries.retain(|entry| entry.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Listener(String);

    impl Named for Listener {
        fn name(&self) -> &str {
            &self.0
        }
    }

    fn names(set: &ListenerSet<dyn Named>) -> Vec<String> {
        let seen = Mutex::new(Vec::new());
        set.for_each(|l| seen.lock().unwrap().push(l.name().to_string()));
        seen.into_inner().unwrap()
    }

    #[test]
    fn test_registration_order_and_duplicates() {
        let a: Arc<dyn Named> = Arc::new(Listener("a".into()));
        let b: Arc<dyn Named> = Arc::new(Listener("b".into()));
        let mut set = ListenerSet::<dyn Named>::new();
        set.add(Arc::downgrade(&a));
        set.add(Arc::downgrade(&b));
        set.add(Arc::downgrade(&a));

        assert_eq!(names(&set), vec!["a", "b", "a"]);

        assert!(set.remove(&a));
        assert_eq!(names(&set), vec!["b", "a"]);
    }

    #[test]
    fn test_remove_unknown_fails() {
        let a: Arc<dyn Named> = Arc::new(Listener("a".into()));
        let mut set = ListenerSet::<dyn Named>::new();
        assert!(!set.remove(&a));
    }

    #[test]
    fn test_dropped_listeners_are_skipped() {
        let a: Arc<dyn Named> = Arc::new(Listener("a".into()));
        let mut set = ListenerSet::<dyn Named>::new();
        {
            let gone: Arc<dyn Named> = Arc::new(Listener("gone".into()));
            set.add(Arc::downgrade(&gone));
        }
        set.add(Arc::downgrade(&a));

        assert_eq!(names(&set), vec!["a"]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_dropped_entries_do_not_accumulate() {
        let kept: Arc<dyn Named> = Arc::new(Listener("kept".into()));
        let mut set = ListenerSet::<dyn Named>::new();
        set.add(Arc::downgrade(&kept));

        for i in 0..100 {
            let temporary: Arc<dyn Named> = Arc::new(Listener(format!("t{}", i)));
            set.add(Arc::downgrade(&temporary));
        }
        assert_eq!(set.len(), 2);

        assert!(set.remove(&kept));
        assert!(set.is_empty());
    }
}
