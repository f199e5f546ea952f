pub mod tail;
pub mod watch;

pub use tail::{read_last_lines, Delta, LineBuffer, TailError, TailReader};
pub use watch::{FileWatch, WatchError, WatchEvent, WatchOptions};
