//! Window-less [`Presenter`] that records what it was asked to show.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{Frame, Presenter, VideoFormat};
use crate::error::{RelayError, Result};

#[derive(Debug, Default)]
struct Record {
    presented: Vec<u64>,
    title: Option<String>,
    fullscreen: bool,
    deinterlace: bool,
    buffers_live: usize,
}

/// Shared view of a [`HeadlessPresenter`]'s activity, usable after the
/// presenter moved onto the display thread.
#[derive(Debug, Clone, Default)]
pub struct HeadlessStats(Arc<Mutex<Record>>);

impl HeadlessStats {
    /// Ids of presented frames, in order.
    pub fn presented(&self) -> Vec<u64> {
        self.0.lock().presented.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.0.lock().title.clone()
    }

    pub fn fullscreen(&self) -> bool {
        self.0.lock().fullscreen
    }

    pub fn deinterlace(&self) -> bool {
        self.0.lock().deinterlace
    }

    /// Buffers created and not yet destroyed.
    pub fn buffers_live(&self) -> usize {
        self.0.lock().buffers_live
    }
}

/// Presents into plain byte buffers.
#[derive(Debug, Default)]
pub struct HeadlessPresenter {
    stats: HeadlessStats,
}

impl HeadlessPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats.clone()
    }
}

impl Presenter for HeadlessPresenter {
    type Buffer = Vec<u8>;

    fn create_buffer(&mut self, format: &VideoFormat) -> Result<Vec<u8>> {
        let size = format.frame_size();
        if size == 0 {
            return Err(RelayError::ReconfigureFailed(format!("empty format {format}")));
        }
        self.stats.0.lock().buffers_live += 1;
        Ok(vec![0; size])
    }

    fn destroy_buffer(&mut self, _buffer: Vec<u8>) {
        let mut record = self.stats.0.lock();
        record.buffers_live = record.buffers_live.saturating_sub(1);
    }

    fn present(&mut self, frame: &Frame<Vec<u8>>) -> Result<()> {
        tracing::trace!(frame = frame.id(), bytes = frame.buffer().len(), "present");
        self.stats.0.lock().presented.push(frame.id());
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        self.stats.0.lock().title = Some(title.to_string());
    }

    fn set_fullscreen(&mut self, fullscreen: bool) {
        self.stats.0.lock().fullscreen = fullscreen;
    }

    fn set_deinterlace(&mut self, enabled: bool) {
        self.stats.0.lock().deinterlace = enabled;
    }
}
