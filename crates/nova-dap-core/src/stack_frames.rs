use std::collections::{BTreeMap, HashMap};

use nova_jdwp::{FrameInfo, JdwpClient, JdwpError, ThreadId};
use parking_lot::Mutex;

/// Most recent raw stack of each suspended thread, by frame index.
///
/// Entries are only valid for the stop they were captured in; callers clear a
/// thread when it resumes and before every walk that starts at frame 0.
#[derive(Debug, Default)]
pub struct StackFrameCache {
    threads: Mutex<HashMap<ThreadId, BTreeMap<usize, FrameInfo>>>,
}

impl StackFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_thread(&self, thread: ThreadId) {
        self.threads.lock().remove(&thread);
    }

    pub fn clear_all(&self) {
        self.threads.lock().clear();
    }

    /// `count` cached frames starting at `start`, if every one of them is cached.
    pub fn cached(&self, thread: ThreadId, start: usize, count: usize) -> Option<Vec<FrameInfo>> {
        let threads = self.threads.lock();
        let frames = threads.get(&thread)?;
        (start..start.saturating_add(count))
            .map(|idx| frames.get(&idx).cloned())
            .collect()
    }

    /// Frames `[start, start + count)`, walking the target only on a miss.
    pub async fn frames(
        &self,
        vm: &dyn JdwpClient,
        thread: ThreadId,
        start: usize,
        count: usize,
    ) -> Result<Vec<FrameInfo>, JdwpError> {
        if let Some(frames) = self.cached(thread, start, count) {
            return Ok(frames);
        }

        let fetched = vm.frames(thread, start, count).await?;
        tracing::trace!(target: "nova.dap", thread, start, count = fetched.len(), "stack walk");
        let mut threads = self.threads.lock();
        let entry = threads.entry(thread).or_default();
        for (offset, frame) in fetched.iter().enumerate() {
            entry.insert(start + offset, frame.clone());
        }
        Ok(fetched)
    }
}
