pub mod codec;
pub mod network;
pub mod packet;
pub mod session;
pub mod tunnel;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
