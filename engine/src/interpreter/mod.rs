//! Response interpretation
//!
//! `tags` splits reasoning from the action payload (live or offline),
//! `hallucination` rejects narrated results and `parser` turns a complete
//! reply into one [`sdk::Step`].

pub mod hallucination;
pub mod parser;
pub mod tags;

pub use parser::{ParseError, ResponseParser};
pub use tags::{TagInterpreter, TagState};
