//! Tagged frames for bracketed release of stack allocations.

use recon_core::FrameTag;

use crate::error::MemoryError;

/// Snapshot taken by [`MemoryManager::push_frame`](crate::MemoryManager::push_frame).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NonPersistentFrame {
    /// Host stack cursor at push time.
    pub host_stack: usize,
    /// Device stack cursor at push time, if there is a device plane.
    pub device_stack: Option<usize>,
    /// Number of logged stack allocations at push time.
    pub stack_mark: usize,
    /// Tag the matching pop must present.
    pub tag: FrameTag,
}

/// LIFO of [`NonPersistentFrame`]s.
#[derive(Clone, Debug, Default)]
pub struct FrameStack {
    frames: Vec<NonPersistentFrame>,
}

impl FrameStack {
    pub(crate) fn push(&mut self, frame: NonPersistentFrame) {
        self.frames.push(frame);
    }

    /// Pop the top frame if its tag is `tag`. On error the stack is
    /// left untouched.
    pub(crate) fn pop(&mut self, tag: FrameTag) -> Result<NonPersistentFrame, MemoryError> {
        let top = self
            .frames
            .last()
            .ok_or(MemoryError::EmptyFrameStack { tag })?;
        if top.tag != tag {
            return Err(MemoryError::FrameTagMismatch {
                expected: top.tag,
                found: tag,
            });
        }
        self.frames.pop().ok_or(MemoryError::EmptyFrameStack { tag })
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    /// Top frame.
    pub fn top(&self) -> Option<&NonPersistentFrame> {
        self.frames.last()
    }

    /// Number of pushed frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is pushed.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
