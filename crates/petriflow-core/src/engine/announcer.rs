//! Outbound announcements
//!
//! Listeners are registered and removed at runtime. Announcements are pushed
//! only after the command that produced them has been committed to the event
//! log, in the order the engine produced them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::trace;

use crate::domain::events::{Announcement, AnnouncementCategory};

/// Receives engine announcements
pub trait EventListener: Send + Sync {
    /// Handle one announcement
    fn announce(&self, announcement: &Announcement);

    /// Whether the listener wants announcements of `category`
    fn accepts(&self, category: AnnouncementCategory) -> bool {
        let _ = category;
        true
    }
}

/// Value object: ListenerId
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Fan-out of announcements to registered listeners
#[derive(Default)]
pub struct EventAnnouncer {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

impl EventAnnouncer {
    /// Announcer without listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        id
    }

    /// Unregister a listener; returns whether it was registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Registered listener count
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Push announcements to every interested listener, in order
    pub fn announce_all(&self, announcements: &[Announcement]) {
        if announcements.is_empty() {
            return;
        }
        // listeners may register others while being called
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for announcement in announcements {
            trace!(
                case_id = %announcement.case_id(),
                event_type = announcement.event_type(),
                "Announcing"
            );
            for listener in &listeners {
                if listener.accepts(announcement.category()) {
                    listener.announce(announcement);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identifier::{CaseId, WorkItemId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<&'static str>>,
        only: Option<AnnouncementCategory>,
    }

    impl EventListener for Collect {
        fn announce(&self, announcement: &Announcement) {
            self.seen.lock().unwrap().push(announcement.event_type());
        }

        fn accepts(&self, category: AnnouncementCategory) -> bool {
            self.only.map_or(true, |only| only == category)
        }
    }

    fn sample() -> Vec<Announcement> {
        let case_id = CaseId::from("c");
        vec![
            Announcement::CaseStarted {
                case_id: case_id.clone(),
                specification: crate::domain::identifier::SpecificationKey::new("s", "1"),
            },
            Announcement::WorkItemStarted {
                case_id: case_id.clone(),
                work_item: WorkItemId::from("c:a#1"),
            },
            Announcement::CaseCancelled { case_id },
        ]
    }

    #[test]
    fn test_announces_in_order() {
        let announcer = EventAnnouncer::new();
        let listener = Arc::new(Collect::default());
        announcer.add_listener(listener.clone());

        announcer.announce_all(&sample());
        assert_eq!(
            *listener.seen.lock().unwrap(),
            vec!["case.started", "work_item.started", "case.cancelled"]
        );
    }

    #[test]
    fn test_category_filter() {
        let announcer = EventAnnouncer::new();
        let listener = Arc::new(Collect {
            only: Some(AnnouncementCategory::WorkItem),
            ..Default::default()
        });
        announcer.add_listener(listener.clone());

        announcer.announce_all(&sample());
        assert_eq!(*listener.seen.lock().unwrap(), vec!["work_item.started"]);
    }

    #[test]
    fn test_remove_listener() {
        let announcer = EventAnnouncer::new();
        let listener = Arc::new(Collect::default());
        let id = announcer.add_listener(listener.clone());
        assert_eq!(announcer.listener_count(), 1);

        assert!(announcer.remove_listener(id));
        assert!(!announcer.remove_listener(id));
        announcer.announce_all(&sample());
        assert!(listener.seen.lock().unwrap().is_empty());
    }
}
