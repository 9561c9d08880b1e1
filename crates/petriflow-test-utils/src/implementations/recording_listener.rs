//! Listener that keeps every announcement it receives.

use parking_lot::Mutex;
use petriflow_core::{Announcement, AnnouncementCategory, CaseId, EventListener};

/// Records announcements in delivery order
#[derive(Debug, Default)]
pub struct RecordingListener {
    received: Mutex<Vec<Announcement>>,
    only: Option<AnnouncementCategory>,
}

impl RecordingListener {
    /// Listener accepting every category
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener accepting a single category
    pub fn for_category(category: AnnouncementCategory) -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            only: Some(category),
        }
    }

    /// Everything received so far
    pub fn announcements(&self) -> Vec<Announcement> {
        self.received.lock().clone()
    }

    /// Announcements for one case
    pub fn for_case(&self, case_id: &CaseId) -> Vec<Announcement> {
        self.received
            .lock()
            .iter()
            .filter(|a| a.case_id() == case_id)
            .cloned()
            .collect()
    }

    /// Dotted event names in delivery order
    pub fn event_types(&self) -> Vec<&'static str> {
        self.received.lock().iter().map(|a| a.event_type()).collect()
    }

    /// How many announcements of `event_type` arrived
    pub fn count(&self, event_type: &str) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|a| a.event_type() == event_type)
            .count()
    }

    /// Forget everything received
    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl EventListener for RecordingListener {
    fn announce(&self, announcement: &Announcement) {
        self.received.lock().push(announcement.clone());
    }

    fn accepts(&self, category: AnnouncementCategory) -> bool {
        self.only.map_or(true, |only| only == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_filter() {
        let listener = RecordingListener::for_category(AnnouncementCategory::Timer);
        assert!(listener.accepts(AnnouncementCategory::Timer));
        assert!(!listener.accepts(AnnouncementCategory::Case));
    }

    #[test]
    fn test_records_in_order() {
        let listener = RecordingListener::new();
        let case_id = CaseId::from("c1");
        listener.announce(&Announcement::CaseSuspended {
            case_id: case_id.clone(),
        });
        listener.announce(&Announcement::CaseResumed {
            case_id: case_id.clone(),
        });

        assert_eq!(listener.event_types(), vec!["case.suspended", "case.resumed"]);
        assert_eq!(listener.count("case.resumed"), 1);
        assert_eq!(listener.for_case(&CaseId::from("other")).len(), 0);
        listener.clear();
        assert!(listener.announcements().is_empty());
    }
}
