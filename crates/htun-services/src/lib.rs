//! htun-services — server-side state: who may connect, which addresses are
//! leased, which sessions are live, and where tunneled packets go.

pub mod delivery;
pub mod ip_allocator;
pub mod registry;
pub mod session;

pub use delivery::{PacketDelivery, PacketQueues};
pub use ip_allocator::{IpAllocator, LeaseError};
pub use registry::ClientRegistry;
pub use session::{ActiveSession, SessionError, SessionMeta, SessionState, SessionTable};
