//! Per-frame data handed to every pass.

use bumpalo::Bump;

/// Timing plus a transient allocator that is reset at the start of every frame.
///
/// Passes allocate scratch data (sorted draw lists, packed uniforms) from
/// [`allocator`](Self::allocator); nothing allocated there outlives the frame.
#[derive(Debug, Default)]
pub struct FrameData {
    allocator: Bump,
    frame_number: u64,
    delta_time: f32,
    elapsed: f32,
}

impl FrameData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the next frame: resets the allocator and advances timing.
    pub fn advance(&mut self, delta_time: f32) {
        self.allocator.reset();
        self.frame_number += 1;
        self.delta_time = delta_time;
        self.elapsed += delta_time;
    }

    pub fn allocator(&self) -> &Bump {
        &self.allocator
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Seconds since the previous frame.
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Seconds since the first frame.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }
}
