// Public module exports
pub mod events;
pub mod parser;
pub mod reader;

// Re-export main types for convenience
pub use events::{BatchResult, StreamEvent};
pub use parser::{EventParser, LineOutcome, ProtocolError, parse_line};
pub use reader::{StreamOutcome, event_stream, read_events};
