pub mod options;
pub mod reader;

pub use options::{InvalidStreamOptions, StreamOptions};
pub use reader::{QueryStreamer, RowMapper, RowStream, StreamError};
