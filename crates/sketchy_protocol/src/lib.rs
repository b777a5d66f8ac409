#![forbid(unsafe_code)]

pub mod frame;

pub use frame::{
	ClientFrame, FrameError, MAX_FRAME_BYTES, Participant, ServerFrame, Shape, decode_client_frame, encode_server_frame,
};
