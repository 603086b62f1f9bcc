//! I/O module
//!
//! Handles the formats crossing the process boundary.
//!
//! # Components
//!
//! - `event_format` - Message body contract (case-insensitive decode, publisher encode)
//! - `replay_reader` - JSON-lines replay file reader with iterator interface
//! - `csv_format` - CSV report of daily balance aggregates

pub mod csv_format;
pub mod event_format;
pub mod replay_reader;

pub use csv_format::{write_aggregates_csv, REPORT_HEADER};
pub use event_format::{decode_event, encode_event, parse_timestamp};
pub use replay_reader::{parse_replay_line, ReplayReader, ReplayRecord};
