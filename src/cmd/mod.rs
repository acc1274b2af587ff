mod decode;
mod m3u8;
mod playerjs;
mod resolve;

pub use decode::{cmd_decode, cmd_encode};
pub use m3u8::cmd_m3u8;
pub use playerjs::cmd_playerjs;
pub use resolve::cmd_resolve;
