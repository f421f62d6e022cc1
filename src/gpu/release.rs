//! Deferred release of GPU resources.
//!
//! A resource replaced during frame N may still be referenced by command
//! buffers of frames N-1..N. It is parked here and dropped once
//! `frames_in_flight` more frames have retired.

use std::collections::VecDeque;

pub struct DeferredRelease<T> {
    frames_in_flight: u64,
    frame: u64,
    pending: VecDeque<(u64, T)>,
}

impl<T> DeferredRelease<T> {
    pub fn new(frames_in_flight: u64) -> Self {
        Self {
            frames_in_flight,
            frame: 0,
            pending: VecDeque::new(),
        }
    }

    /// Park `item` until the current frame retires.
    pub fn retire(&mut self, item: T) {
        self.pending.push_back((self.frame, item));
    }

    /// Mark the current frame submitted. Returns how many items were dropped.
    pub fn advance(&mut self) -> usize {
        self.frame += 1;
        let mut dropped = 0;
        while let Some((retired_at, _)) = self.pending.front() {
            if retired_at + self.frames_in_flight > self.frame {
                break;
            }
            self.pending.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Drop everything; the caller has waited for the device to go idle.
    pub fn flush(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_released_after_frames_in_flight() {
        let mut release = DeferredRelease::new(2);
        let item = Rc::new(());
        release.retire(item.clone());
        assert_eq!(Rc::strong_count(&item), 2);

        assert_eq!(release.advance(), 0);
        assert_eq!(Rc::strong_count(&item), 2);
        assert_eq!(release.advance(), 1);
        assert_eq!(Rc::strong_count(&item), 1);
        assert!(release.is_empty());
    }

    #[test]
    fn test_flush() {
        let mut release = DeferredRelease::new(3);
        release.retire(1);
        release.advance();
        release.retire(2);
        assert_eq!(release.len(), 2);
        release.flush();
        assert!(release.is_empty());
    }
}
