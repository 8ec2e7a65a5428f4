//! SOCKS5 data plane
//!
//! Sessions arrive over the tunnel, either one per dedicated connection or
//! as streams of a multiplexed control connection. Each session negotiates
//! a destination, opens an outbound link to it and then relays bytes
//! between the tunnel and that link.

mod buffer;
mod codec;
mod connector;
mod consts;
mod relay;
mod session;
mod types;

pub use buffer::InboundBuffer;
pub use codec::parse_address;
pub use connector::{Connector, Resolver, TcpConnector, TokioResolver};
pub use consts::*;
pub use relay::{forward_downlink, run_downlink, RelayMode, Uplink};
pub use session::{DirectInitState, Dialect, NegotiatedState, Session, SessionState};
pub use types::{AddressKind, TargetAddr};
