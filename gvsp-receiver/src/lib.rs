#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::similar_names)]

//! A lock-disciplined GVSP streaming receiver.
//!
//! [`Session`] owns a bound UDP socket and, once a reassembly buffer has
//! been created, a dedicated receive thread that classifies incoming
//! datagrams (leader / data / trailer), reassembles a frame's payload,
//! decodes it with `gvsp_proto`, and invokes the installed
//! [`FrameCallback`].
//!
//! Two disjoint locks guard session state: a "frame lock" over the
//! in-progress frame, the reassembly buffer, and the callback slot, and
//! an "enable lock" over the `receiving` flag the controller and receive
//! thread use to coordinate shutdown. Whenever both are held, they are
//! acquired in that order — frame, then enable — and released in
//! reverse. `set_frame_callback` only ever takes the frame lock; nothing
//! in this crate takes enable before frame.
//!
//! The frame callback itself runs after both locks have been released:
//! the receive loop copies the completed frame's bytes out of the
//! reassembly buffer while holding the frame lock, drops both locks,
//! then decodes and invokes the callback. This bounds how long either
//! lock is held to the cost of a `memcpy`, regardless of how long the
//! consumer's callback takes to run.

mod error;
mod frame;
mod receive;
mod session;

pub use error::{ControlError, ControlResult};
pub use frame::FrameCallback;
pub use session::Session;

pub use gvsp_proto::header::HEADER_OVERHEAD;
pub use gvsp_proto::pixel::{PixelDecodeError, PixelFormat, PixelMatrix};
