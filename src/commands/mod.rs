//! Command implementations behind the `rapi` binary.

mod profile;
mod request;
mod watch;

pub use profile::profile;
pub use request::{parse_header, parse_query, request};
pub use watch::{format_event, watch};
