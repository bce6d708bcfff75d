/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The dedicated receive thread: reads datagrams off a bound socket,
//! classifies and dispatches them, and reassembles complete frames.
//!
//! Lock order within one loop iteration is always {frame, enable}, never
//! the reverse — see the crate-level docs.

use std::fmt;
use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use gvsp_proto::header::{self, HeaderError, PacketFormat, PacketHeader};
use gvsp_proto::pixel::{self, PixelDecodeError, PixelFormat};
use tracing::{info, warn};

use crate::frame::FrameCallback;
use crate::session::Shared;

/// Scratch buffer size for one incoming datagram. GVSP data packets are
/// sized to fit inside the configured packet MTU, which is always well
/// under a conventional Ethernet jumbo frame.
const SCRATCH_LEN: usize = 2048;

/// Minimum total datagram length spec requires for a leader or trailer
/// packet (8-byte header plus at least 4 bytes), ahead of whatever
/// further payload parsing the packet type needs.
const MIN_LEADER_TRAILER_LEN: usize = 12;

/// Why one datagram was dropped. Never surfaced to a caller — every
/// variant here is logged (when warnings are enabled) and then
/// forgotten, per spec: protocol-level failures are always soft.
#[derive(Debug)]
enum PacketReject {
    Header(HeaderError),
    HeaderInvalid,
    NoBuffer,
    LeaderPayload(HeaderError),
    DataBeforeLeader,
    DataZeroPacketId,
    DataTooShort,
    DataOutOfRange,
    TrailerBeforeLeader,
    TrailerTooShort { len: usize },
    PacketsDropped { expected: usize, received: usize },
    UnsupportedPixelFormat(u32),
    Decode(PixelDecodeError),
}

impl fmt::Display for PacketReject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(e) => write!(f, "malformed header: {e}"),
            Self::HeaderInvalid => write!(f, "header failed validation (status/block_id/ext_id)"),
            Self::NoBuffer => write!(f, "no reassembly buffer configured"),
            Self::LeaderPayload(e) => write!(f, "rejected leader payload: {e}"),
            Self::DataBeforeLeader => write!(f, "data packet arrived before a leader, or after a trailer"),
            Self::DataZeroPacketId => write!(f, "data packet id is zero"),
            Self::DataTooShort => write!(f, "data packet shorter than the configured packet payload size"),
            Self::DataOutOfRange => write!(f, "data packet id places it past the end of the payload buffer"),
            Self::TrailerBeforeLeader => write!(f, "trailer arrived without a preceding leader"),
            Self::TrailerTooShort { len } => {
                write!(f, "trailer ({len} bytes) is shorter than the required {MIN_LEADER_TRAILER_LEN} bytes")
            }
            Self::PacketsDropped { expected, received } => {
                write!(f, "{} of {expected} packets dropped", expected - received)
            }
            Self::UnsupportedPixelFormat(code) => write!(f, "unsupported pixel format {code:#010x}"),
            Self::Decode(e) => write!(f, "pixel decode failed: {e}"),
        }
    }
}

/// A completed frame's bytes, copied out of the reassembly buffer while
/// the frame lock was held. Decoding and callback delivery happen after
/// both the frame and enable locks have been released.
struct PendingDelivery {
    pixel_format: u32,
    size_x: u32,
    size_s: u32,
    buf: Vec<u8>,
    callback: FrameCallback,
}

/// Runs the receive loop until `receiving` is cleared or the socket
/// fails. Always clears `receiving` itself before returning, whichever
/// way it exits — see the crate-level docs on "fatal thread termination".
pub(crate) fn run(
    socket: Arc<UdpSocket>,
    shared: Arc<Mutex<Shared>>,
    receiving: Arc<Mutex<bool>>,
    verbose: Arc<AtomicBool>,
    warnings: Arc<AtomicBool>,
) {
    let port = socket.local_addr().map(|addr| addr.port()).unwrap_or(0);
    if verbose.load(Ordering::Relaxed) {
        info!(port, "receive loop listening");
    }

    let mut scratch = vec![0u8; SCRATCH_LEN];

    loop {
        let recv_result = socket.recv_from(&mut scratch);

        if let Err(e) = &recv_result {
            if !is_timeout(e) {
                warn!(error = %e, "receive loop socket error, terminating");
                clear_receiving(&receiving);
                return;
            }
        }

        let mut frame_guard = shared.lock().unwrap_or_else(|poison| poison.into_inner());

        let pending = if let Ok((len, _src)) = recv_result {
            match handle_datagram(&scratch[..len], &mut frame_guard) {
                Ok(pending) => pending,
                Err(reject) => {
                    if warnings.load(Ordering::Relaxed) {
                        warn!(%reject, "dropped datagram");
                    }
                    None
                }
            }
        } else {
            None
        };

        let mut enable_guard = receiving.lock().unwrap_or_else(|poison| poison.into_inner());
        let keep_running = *enable_guard;
        if !keep_running {
            // Idempotent: the controller may already have cleared this, but
            // the exiting thread clears it unconditionally so a fatal exit
            // can never leave `receiving = true` with no thread behind it.
            *enable_guard = false;
        }
        drop(enable_guard);
        drop(frame_guard);

        if !keep_running {
            if verbose.load(Ordering::Relaxed) {
                info!("receive loop stopped");
            }
            return;
        }

        if let Some(pending) = pending {
            deliver(pending, warnings.load(Ordering::Relaxed));
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn clear_receiving(receiving: &Mutex<bool>) {
    let mut guard = receiving.lock().unwrap_or_else(|poison| poison.into_inner());
    *guard = false;
}

fn handle_datagram(
    datagram: &[u8],
    shared: &mut Shared,
) -> Result<Option<PendingDelivery>, PacketReject> {
    let parsed = header::parse(datagram).map_err(PacketReject::Header)?;
    if !header::validate(&parsed) {
        return Err(PacketReject::HeaderInvalid);
    }

    match parsed.format {
        PacketFormat::Leader => {
            handle_leader(datagram, shared)?;
            Ok(None)
        }
        PacketFormat::Data => {
            handle_data(datagram, &parsed, shared)?;
            Ok(None)
        }
        PacketFormat::Trailer => handle_trailer(datagram, shared),
        PacketFormat::Unknown(_) => Ok(None),
    }
}

fn handle_leader(datagram: &[u8], shared: &mut Shared) -> Result<(), PacketReject> {
    let packet_count = shared.buffer.as_ref().ok_or(PacketReject::NoBuffer)?.packet_count;
    let payload = &datagram[header::HEADER_LEN..];
    let info = header::parse_leader_payload(payload).map_err(PacketReject::LeaderPayload)?;
    shared.frame.begin(info.pixel_format, info.size_x, info.size_s, packet_count);
    Ok(())
}

fn handle_data(datagram: &[u8], header: &PacketHeader, shared: &mut Shared) -> Result<(), PacketReject> {
    if !shared.frame.leader_received {
        return Err(PacketReject::DataBeforeLeader);
    }
    if header.packet_id == 0 {
        return Err(PacketReject::DataZeroPacketId);
    }

    let buffer = shared.buffer.as_mut().ok_or(PacketReject::NoBuffer)?;
    let packet_payload_size = buffer.packet_payload_size;
    if datagram.len() < header::HEADER_LEN + packet_payload_size {
        return Err(PacketReject::DataTooShort);
    }

    let start = (header.packet_id as usize - 1) * packet_payload_size;
    if start + packet_payload_size > buffer.payload_size {
        return Err(PacketReject::DataOutOfRange);
    }

    let src = &datagram[header::HEADER_LEN..header::HEADER_LEN + packet_payload_size];
    buffer.data[start..start + packet_payload_size].copy_from_slice(src);
    shared.frame.mark_received(header.packet_id);
    Ok(())
}

fn handle_trailer(datagram: &[u8], shared: &mut Shared) -> Result<Option<PendingDelivery>, PacketReject> {
    if !shared.frame.leader_received {
        return Err(PacketReject::TrailerBeforeLeader);
    }
    // Clear before any further check so a missing leader for the next
    // frame is detected, per spec.
    shared.frame.end();

    // Same minimum-length gate as the leader, per spec: a trailer that's
    // just the 8-byte header (or shorter than that plus a few bytes) is
    // malformed and must not trigger delivery, even once the packet
    // count otherwise checks out.
    if datagram.len() < MIN_LEADER_TRAILER_LEN {
        return Err(PacketReject::TrailerTooShort { len: datagram.len() });
    }

    let buffer = shared.buffer.as_ref().ok_or(PacketReject::NoBuffer)?;
    let received = shared.frame.received_packets();
    if received != buffer.packet_count {
        return Err(PacketReject::PacketsDropped {
            expected: buffer.packet_count,
            received,
        });
    }

    let Some(callback) = shared.callback.clone() else {
        return Ok(None);
    };

    Ok(Some(PendingDelivery {
        pixel_format: shared.frame.pixel_format,
        size_x: shared.frame.size_x,
        size_s: shared.frame.size_s,
        buf: buffer.data.clone(),
        callback,
    }))
}

fn deliver(pending: PendingDelivery, warnings_enabled: bool) {
    let reject = match PixelFormat::from_code(pending.pixel_format) {
        None => Some(PacketReject::UnsupportedPixelFormat(pending.pixel_format)),
        Some(format) => match pixel::decode(format, pending.size_s, pending.size_x, &pending.buf) {
            Ok(matrix) => {
                (pending.callback)(matrix, format.bit_depth());
                None
            }
            Err(e) => Some(PacketReject::Decode(e)),
        },
    };

    if let Some(reject) = reject {
        if warnings_enabled {
            warn!(%reject, "dropped completed frame");
        }
    }
}
