use termbook_core::types::CollectionName;

/// What the user is looking at: the selected collection, its size and the
/// last known scroll position and viewport height.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSession {
    pub collection: Option<CollectionName>,
    pub total_count: usize,
    pub scroll_px: f64,
    pub viewport_px: f64,
    last_inputs: Option<(f64, f64)>,
}

impl ViewSession {
    pub fn new(viewport_px: f64) -> Self {
        Self { viewport_px, ..Self::default() }
    }

    /// Switch to `collection` (or to nothing). Scroll goes back to the top;
    /// the viewport is a property of the host and carries over.
    pub fn select(&mut self, collection: Option<CollectionName>, total_count: usize) {
        self.collection = collection;
        self.total_count = total_count;
        self.scroll_px = 0.0;
        self.last_inputs = None;
    }

    /// Record the inputs of an issued read. Returns false if they match the
    /// previous read, in which case nothing needs fetching.
    pub(crate) fn mark_issued(&mut self) -> bool {
        let inputs = (self.scroll_px, self.viewport_px);
        if self.last_inputs == Some(inputs) {
            return false;
        }
        self.last_inputs = Some(inputs);
        true
    }

    pub(crate) fn forget_issued(&mut self) {
        self.last_inputs = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_resets_scroll_and_keeps_viewport() {
        let mut session = ViewSession::new(450.0);
        session.scroll_px = 900.0;
        assert!(session.mark_issued());
        assert!(!session.mark_issued());

        session.select(Some(CollectionName::new("bio").unwrap()), 10);
        assert_eq!(session.scroll_px, 0.0);
        assert_eq!(session.viewport_px, 450.0);
        assert!(session.mark_issued(), "a new collection always reads");
    }
}
