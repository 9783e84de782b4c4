//! Real-time duplex voice sessions against an OpenAI-realtime-style
//! endpoint, with function calls forwarded to an external specialist
//! network and their results narrated back when the floor is free.

pub mod audio;
pub mod config;
pub mod filler;
pub mod injection;
pub mod invocation;
pub mod protocol;
pub mod session;
pub mod specialist;
