/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-frame reassembly state and the reassembly buffer, both guarded by
//! the session's frame lock.

use std::sync::Arc;

use gvsp_proto::PixelMatrix;

/// Invoked once per complete frame with the decoded pixel matrix and its
/// bit depth (`8`, `10`, `12`, or `16`).
///
/// Installed via [`crate::Session::set_frame_callback`]. Runs on the
/// receive thread, after both the frame and enable locks have been
/// released — see the crate-level docs for why.
pub type FrameCallback = Arc<dyn Fn(PixelMatrix, u8) + Send + Sync + 'static>;

/// The in-progress frame: dimensions and format from the last accepted
/// leader, and a received-packet bitmap keyed by 0-based packet index.
#[derive(Debug, Default)]
pub(crate) struct FrameState {
    pub(crate) pixel_format: u32,
    pub(crate) size_x: u32,
    pub(crate) size_s: u32,
    pub(crate) leader_received: bool,
    bitmap: Vec<bool>,
}

impl FrameState {
    /// Re-arms frame state for a newly accepted leader. `packet_count` is
    /// the reassembly buffer's fixed packet count (independent of the
    /// leader's reported dimensions).
    pub(crate) fn begin(&mut self, pixel_format: u32, size_x: u32, size_s: u32, packet_count: usize) {
        self.pixel_format = pixel_format;
        self.size_x = size_x;
        self.size_s = size_s;
        self.leader_received = true;
        self.bitmap.clear();
        self.bitmap.resize(packet_count, false);
    }

    /// Marks `packet_id` (1-based) as received. A repeat mark is a no-op:
    /// the per-slot bitmap makes duplicate packets uncountable, per the
    /// recommended fix for spec's "duplicate data packet counting" note.
    pub(crate) fn mark_received(&mut self, packet_id: u32) {
        if let Some(slot) = self.bitmap.get_mut(packet_id as usize - 1) {
            *slot = true;
        }
    }

    /// Count of distinct data packets received so far this frame.
    pub(crate) fn received_packets(&self) -> usize {
        self.bitmap.iter().filter(|b| **b).count()
    }

    /// Clears `leader_received` so a missing leader for the next frame is
    /// detectable; called by the trailer handler before any other check.
    pub(crate) fn end(&mut self) {
        self.leader_received = false;
    }
}

/// The reassembly buffer and the packet-size arithmetic fixed at
/// `create_buffer` time.
pub(crate) struct Buffer {
    pub(crate) payload_size: usize,
    pub(crate) packet_payload_size: usize,
    pub(crate) packet_count: usize,
    pub(crate) data: Vec<u8>,
}

impl Buffer {
    pub(crate) fn new(payload_size: usize, packet_payload_size: usize) -> Self {
        let packet_count = payload_size / packet_payload_size;
        Self {
            payload_size,
            packet_payload_size,
            packet_count,
            data: vec![0u8; payload_size],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_packets_do_not_inflate_the_count() {
        let mut frame = FrameState::default();
        frame.begin(0x0108_0001, 4, 2, 3);

        frame.mark_received(1);
        frame.mark_received(1);
        frame.mark_received(2);

        assert_eq!(frame.received_packets(), 2);
    }

    #[test]
    fn begin_resets_the_bitmap_for_a_new_frame() {
        let mut frame = FrameState::default();
        frame.begin(0x0108_0001, 4, 2, 2);
        frame.mark_received(1);
        frame.mark_received(2);
        assert_eq!(frame.received_packets(), 2);

        frame.begin(0x0108_0001, 4, 2, 2);
        assert_eq!(frame.received_packets(), 0);
    }

    #[test]
    fn mark_received_ignores_out_of_range_packet_ids() {
        let mut frame = FrameState::default();
        frame.begin(0x0108_0001, 4, 2, 2);
        frame.mark_received(99);
        assert_eq!(frame.received_packets(), 0);
    }

    #[test]
    fn buffer_new_computes_packet_count() {
        let buffer = Buffer::new(24, 8);
        assert_eq!(buffer.packet_count, 3);
        assert_eq!(buffer.data.len(), 24);
    }
}
