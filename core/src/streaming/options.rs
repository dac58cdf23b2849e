use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidStreamOptions {
    #[error("stream name must not be blank")]
    BlankStreamName,

    #[error("fetch size must be greater than zero")]
    ZeroFetchSize,
}

/// Per-stream knobs, validated at construction so the reader never has to.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    stream_name: String,
    fetch_size: usize,
}

impl StreamOptions {
    pub fn new(
        stream_name: impl Into<String>,
        fetch_size: usize,
    ) -> Result<Self, InvalidStreamOptions> {
        let stream_name = stream_name.into();
        if stream_name.trim().is_empty() {
            return Err(InvalidStreamOptions::BlankStreamName);
        }
        if fetch_size == 0 {
            return Err(InvalidStreamOptions::ZeroFetchSize);
        }
        Ok(StreamOptions { stream_name, fetch_size })
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }
}
