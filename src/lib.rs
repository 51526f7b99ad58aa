pub mod config;
pub mod logging;
pub mod push;
pub mod server;
pub mod transport;
pub mod uploader;
pub mod utils;

pub use config::{Config, ConfigError};
pub use transport::{HttpTransport, ProgressSink, Transport, TransportError};
pub use uploader::{Settlement, SubmitError, UploadId, UploadRequest, Uploader};
