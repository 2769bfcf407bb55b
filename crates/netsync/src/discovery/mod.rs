//! Finding servers without a session.

mod frame;
mod scanner;

pub use frame::{InfoResponse, decode_request, encode_request};
pub use scanner::{DiscoveryScanner, ServerInfo};
