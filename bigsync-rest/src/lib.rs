//! REST layer for bigsync
//!
//! Talks to the BigIP management API: transports (direct or through a forward proxy),
//! the reachability probe, URI construction, response classification, the supported
//! version gate and chunked uploads of local files.

pub mod client;
pub mod errors;
pub mod json;
pub mod method;
pub mod probe;
pub mod testing;
pub mod transport;
pub mod upload;
pub mod uri;
pub mod version;

pub use client::{ClientOptions, ContentKind, RestClient, RestRequest, RestResponse, SendResult};
pub use errors::{RestError, RestFailure, Result};
pub use method::Method;
pub use probe::{ReachabilityProbe, TcpProbe};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportOptions};
pub use upload::{
    ByteRange, CancelFlag, ChunkedUploader, TransferInfo, TransferState, UploadProgress,
    UploadSummary, MAX_CHUNK_SIZE,
};
pub use uri::UriBuilder;
pub use version::{Version, VersionGate};
