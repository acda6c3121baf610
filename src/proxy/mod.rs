//! 正向代理核心：请求解析、目标连接、握手应答与双向转发

pub mod connector;
pub mod handshake;
pub mod relay;
pub mod request;
pub mod session;

pub use connector::{connect_target, ConnectOptions};
pub use handshake::{ForwardMode, HandshakePlan};
pub use relay::{relay, RelayStats};
pub use request::{read_request, ProxyRequest, RequestLine, Scheme, REVERSED_VPN_MARKER};
pub use session::{handle_connection, Session, SessionOptions, SessionReport, SessionState};
