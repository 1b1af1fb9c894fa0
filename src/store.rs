use crate::bounding_box::DetectionResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the outcome of the most recent successful upload.
pub trait ResultStore: Send + Sync + 'static {
    fn replace(&self, result: Arc<DetectionResult>);
    fn latest(&self) -> Option<Arc<DetectionResult>>;
}

#[derive(Debug, Default)]
pub struct LastResultSlot {
    slot: RwLock<Option<Arc<DetectionResult>>>,
}

impl LastResultSlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for LastResultSlot {
    fn replace(&self, result: Arc<DetectionResult>) {
        *self.slot.write() = Some(result);
    }

    fn latest(&self) -> Option<Arc<DetectionResult>> {
        self.slot.read().clone()
    }
}
