/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The public session type: socket lifecycle, reassembly buffer
//! lifecycle, and receive thread start/stop.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use gvsp_proto::header::HEADER_OVERHEAD;
use tracing::info;

use crate::error::{ControlError, ControlResult};
use crate::frame::{Buffer, FrameCallback, FrameState};
use crate::receive;

/// Receive socket's blocking-read timeout. Bounds how long the receive
/// thread can sit inside `recv_from` after `receiving` has been cleared,
/// so `stop_receive` always returns promptly.
const SOCKET_RECV_TIMEOUT: Duration = Duration::from_millis(100);

struct SocketHandle {
    socket: Arc<UdpSocket>,
    port: u16,
}

/// State guarded by the frame lock: the in-progress frame, the
/// reassembly buffer (absent until [`Session::create_buffer`]), and the
/// installed frame callback.
pub(crate) struct Shared {
    pub(crate) frame: FrameState,
    pub(crate) buffer: Option<Buffer>,
    pub(crate) callback: Option<FrameCallback>,
}

/// One GVSP receiving session: a bound UDP socket, an optional
/// reassembly buffer, and (while receiving) a dedicated receive thread.
///
/// Mirrors the lifecycle `spec` names: `{idle -> buffered -> receiving
/// -> buffered -> idle}`. Every method here can be called from any
/// thread; the socket, the frame state, and the `receiving` flag each
/// live behind their own lock (see the crate-level docs for the
/// acquisition order that matters: frame before enable).
pub struct Session {
    socket: Mutex<Option<SocketHandle>>,
    receiving: Arc<Mutex<bool>>,
    shared: Arc<Mutex<Shared>>,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
    verbose: Arc<AtomicBool>,
    warnings: Arc<AtomicBool>,
}

impl Session {
    /// Allocates a session and binds a UDP socket to `(host_ip, 0)`,
    /// letting the OS choose an ephemeral port. Sets the mandatory
    /// 100 ms receive timeout.
    ///
    /// ```no_run
    /// use std::net::Ipv4Addr;
    /// use gvsp_receiver::Session;
    ///
    /// let session = Session::open(Ipv4Addr::new(192, 168, 1, 10)).unwrap();
    /// println!("bound on port {}", session.port().unwrap());
    /// ```
    #[tracing::instrument(level = "info")]
    pub fn open(host_ip: Ipv4Addr) -> ControlResult<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(host_ip, 0))?;
        socket.set_read_timeout(Some(SOCKET_RECV_TIMEOUT))?;
        let port = socket.local_addr()?.port();

        let session = Self {
            socket: Mutex::new(Some(SocketHandle {
                socket: Arc::new(socket),
                port,
            })),
            receiving: Arc::new(Mutex::new(false)),
            shared: Arc::new(Mutex::new(Shared {
                frame: FrameState::default(),
                buffer: None,
                callback: None,
            })),
            receive_thread: Mutex::new(None),
            verbose: Arc::new(AtomicBool::new(false)),
            warnings: Arc::new(AtomicBool::new(true)),
        };

        if session.verbose.load(Ordering::Relaxed) {
            info!(port, "bound GVSP receive socket");
        }

        Ok(session)
    }

    /// The ephemeral port the socket was bound to, so the caller can
    /// configure the camera's GVSP destination port.
    pub fn port(&self) -> ControlResult<u16> {
        let guard = self.socket.lock().unwrap_or_else(|poison| poison.into_inner());
        guard
            .as_ref()
            .map(|handle| handle.port)
            .ok_or(ControlError::Connection("socket is not open"))
    }

    /// Closes the socket. Fails if the session is currently receiving.
    #[tracing::instrument(skip(self), level = "info")]
    pub fn close(&self) -> ControlResult<()> {
        if self.verbose.load(Ordering::Relaxed) {
            info!("try closing GVSP receive socket");
        }
        if *self.receiving.lock().unwrap_or_else(|poison| poison.into_inner()) {
            return Err(ControlError::Connection("cannot close socket while receiving"));
        }
        let mut guard = self.socket.lock().unwrap_or_else(|poison| poison.into_inner());
        if guard.take().is_none() {
            return Err(ControlError::Connection("socket already closed"));
        }
        if self.verbose.load(Ordering::Relaxed) {
            info!("closed GVSP receive socket");
        }
        Ok(())
    }

    /// Allocates the reassembly buffer. `packet_size` is the configured
    /// packet MTU, including the 36-byte IP+UDP+GVSP header allowance;
    /// `payload_size` is the total per-frame image payload in bytes.
    ///
    /// Fails if a buffer already exists, if the session is currently
    /// receiving, if `packet_size <= 36`, or if `payload_size` isn't an
    /// exact multiple of `packet_size - 36`.
    #[tracing::instrument(skip(self), level = "info")]
    pub fn create_buffer(&self, payload_size: usize, packet_size: usize) -> ControlResult<()> {
        if self.verbose.load(Ordering::Relaxed) {
            info!(payload_size, packet_size, "try allocating reassembly buffer");
        }
        if *self.receiving.lock().unwrap_or_else(|poison| poison.into_inner()) {
            return Err(ControlError::Connection("cannot create buffer while receiving"));
        }

        let packet_payload_size = packet_size
            .checked_sub(HEADER_OVERHEAD)
            .filter(|&n| n > 0)
            .ok_or(ControlError::Value("packet_size must exceed the 36-byte header overhead"))?;
        if payload_size == 0 || payload_size % packet_payload_size != 0 {
            return Err(ControlError::Value(
                "payload_size must be a non-zero multiple of (packet_size - 36)",
            ));
        }

        let mut shared = self.shared.lock().unwrap_or_else(|poison| poison.into_inner());
        if shared.buffer.is_some() {
            return Err(ControlError::Resource("a reassembly buffer already exists"));
        }
        shared.buffer = Some(Buffer::new(payload_size, packet_payload_size));
        shared.frame = FrameState::default();
        if self.verbose.load(Ordering::Relaxed) {
            info!(payload_size, packet_payload_size, "allocated reassembly buffer");
        }
        Ok(())
    }

    /// Releases the reassembly buffer. Fails if none exists, or if the
    /// session is currently receiving.
    #[tracing::instrument(skip(self), level = "info")]
    pub fn free_buffer(&self) -> ControlResult<()> {
        if self.verbose.load(Ordering::Relaxed) {
            info!("try freeing reassembly buffer");
        }
        if *self.receiving.lock().unwrap_or_else(|poison| poison.into_inner()) {
            return Err(ControlError::Connection("cannot free buffer while receiving"));
        }
        let mut shared = self.shared.lock().unwrap_or_else(|poison| poison.into_inner());
        if shared.buffer.take().is_none() {
            return Err(ControlError::Resource("no reassembly buffer to free"));
        }
        if self.verbose.load(Ordering::Relaxed) {
            info!("freed reassembly buffer");
        }
        Ok(())
    }

    /// Sends a 4-byte all-zero datagram to `(camera_ip, bound_port)` to
    /// establish NAT/firewall conntrack state, then spawns the dedicated
    /// receive thread.
    ///
    /// Fails if already receiving, if the socket is closed, or if no
    /// buffer has been created.
    #[tracing::instrument(skip(self), level = "info")]
    pub fn start_receive(&self, camera_ip: Ipv4Addr) -> ControlResult<()> {
        if self.verbose.load(Ordering::Relaxed) {
            info!(%camera_ip, "try starting receive thread");
        }
        // Each of the three locks here is taken alone, never nested inside
        // another: the {frame, enable} ordering rule only constrains what
        // happens when both are held at once, which this method never does.
        if *self.receiving.lock().unwrap_or_else(|poison| poison.into_inner()) {
            return Err(ControlError::Connection("already receiving"));
        }

        if self
            .shared
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .buffer
            .is_none()
        {
            return Err(ControlError::Resource("no reassembly buffer has been created"));
        }

        let (socket, port) = {
            let socket_guard = self.socket.lock().unwrap_or_else(|poison| poison.into_inner());
            let handle = socket_guard
                .as_ref()
                .ok_or(ControlError::Connection("socket is not open"))?;
            (handle.socket.clone(), handle.port)
        };

        socket
            .send_to(&[0u8; 4], SocketAddrV4::new(camera_ip, port))
            .map_err(|_| ControlError::Connection("failed to send firewall-traversal datagram"))?;

        {
            let mut receiving = self.receiving.lock().unwrap_or_else(|poison| poison.into_inner());
            if *receiving {
                return Err(ControlError::Connection("already receiving"));
            }
            *receiving = true;
        }

        let thread_receiving = self.receiving.clone();
        let thread_shared = self.shared.clone();
        let thread_verbose = self.verbose.clone();
        let thread_warnings = self.warnings.clone();
        let join_handle = std::thread::spawn(move || {
            receive::run(socket, thread_shared, thread_receiving, thread_verbose, thread_warnings);
        });

        *self.receive_thread.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(join_handle);
        if self.verbose.load(Ordering::Relaxed) {
            info!("receive thread started");
        }
        Ok(())
    }

    /// Clears `receiving` and joins the receive thread. On return, the
    /// loop has exited and no further callbacks will fire.
    ///
    /// Fails if not currently receiving.
    #[tracing::instrument(skip(self), level = "info")]
    pub fn stop_receive(&self) -> ControlResult<()> {
        if self.verbose.load(Ordering::Relaxed) {
            info!("try stopping receive thread");
        }
        {
            let mut receiving = self.receiving.lock().unwrap_or_else(|poison| poison.into_inner());
            if !*receiving {
                return Err(ControlError::Connection("not receiving"));
            }
            *receiving = false;
        }

        let handle = self
            .receive_thread
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.join().ok();
        }
        if self.verbose.load(Ordering::Relaxed) {
            info!("receive thread stopped");
        }
        Ok(())
    }

    /// Whether the receive thread is currently running.
    pub fn is_receiving(&self) -> bool {
        *self.receiving.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Installs (or, with `None`, detaches) the per-frame callback.
    /// Takes effect atomically under the frame lock, so it never races
    /// with an in-flight frame delivery.
    pub fn set_frame_callback(&self, callback: Option<FrameCallback>) {
        self.shared.lock().unwrap_or_else(|poison| poison.into_inner()).callback = callback;
    }

    /// Enables or disables `tracing::info!` lifecycle logging.
    pub fn set_verbose(&self, enabled: bool) {
        self.verbose.store(enabled, Ordering::Relaxed);
    }

    /// Enables or disables `tracing::warn!` protocol-rejection logging.
    /// Enabled by default.
    pub fn set_warnings(&self, enabled: bool) {
        self.warnings.store(enabled, Ordering::Relaxed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_receiving() {
            let _ = self.stop_receive();
        }
    }
}
