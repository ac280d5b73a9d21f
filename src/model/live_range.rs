use std::sync;

use tracing::{event, Level};

use crate::config;
use crate::model::document::change;
use crate::model::document::structure;
use crate::model::position::Position;
use crate::model::range::Range;
use crate::util;

/// A [Range] that follows the document it was created against. Every change
/// the document applies rebases both boundaries, until the range is detached.
pub struct LiveRange {
    range: sync::Arc<parking_lot::Mutex<Range>>,
    subscription: Option<util::Subscription<change::Change>>,
}

impl LiveRange {
    pub fn new(range: Range, changes: &util::Emitter<change::Change>, stickiness: config::Stickiness) -> LiveRange {
        let range = sync::Arc::new(parking_lot::Mutex::new(range));

        let shared = range.clone();
        let subscription = changes.subscribe(move |change: &change::Change| {
            if !change.is_structural() {
                return;
            }

            let mut range = shared.lock();
            if range.rebase(change, stickiness) {
                event!(Level::TRACE, "live range rebased to {} by change from generation {}", *range, change.generation);
            }
        });

        LiveRange {
            range,
            subscription: Some(subscription),
        }
    }

    /// A copy of the current boundaries.
    pub fn range(&self) -> Range {
        self.range.lock().clone()
    }

    pub fn start(&self) -> Position {
        self.range.lock().start.clone()
    }

    pub fn end(&self) -> Position {
        self.range.lock().end.clone()
    }

    pub fn is_collapsed(&self) -> bool {
        self.range.lock().is_collapsed()
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.as_ref().map_or(false, |s| s.is_active())
    }

    /// Stops following the document. Detaching twice is harmless.
    pub fn detach(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    pub fn is_valid(&self, root: &sync::Arc<structure::Node>) -> bool {
        self.range.lock().validate(root).is_ok()
    }
}

impl std::fmt::Debug for LiveRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveRange")
            .field("range", &*self.range.lock())
            .field("attached", &self.is_attached())
            .finish()
    }
}
