//! Buffered playback: a producer thread fills a bounded [`buffer::FrameBuffer`]
//! from a frame source while a paced display loop drains it.

pub mod buffer;
pub mod controller;
pub mod display;
pub mod input;
pub mod session;
