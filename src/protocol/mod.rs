//! Message Protocol
//!
//! Wire format shared with the capture engine.
//!
//! Server → client frames are JSON objects with a `type` discriminator:
//! - `stats` - aggregate counters under a `stats` key
//! - `status` - `running` and `packet_count`
//! - `ping` - liveness probe, answered with the bare token `"ping"`
//!
//! Client → server frames are bare tokens: `"stats"`, `"status"`, `"ping"`.

mod messages;

pub use messages::{
    decode, CaptureStatusResponse, ClientRequest, DecodeError, StatsSnapshot, StatusSnapshot,
    WireMessage,
};
