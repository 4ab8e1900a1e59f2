mod error;
mod handler;
mod proxy;
pub mod transport;

pub use error::ProxyError;
pub use handler::{NullHandler, SignalHandler};
pub use proxy::{CallOutput, PendingCall, Proxy};
pub use transport::connect_unix;
