//! Seams to the outside world: the inbound event channel, the outbound
//! history write-back, and the notice bus.

pub mod channel;
pub mod notices;
pub mod traits;

pub use channel::{ChannelTransport, RecordingHistoryReplacer};
pub use notices::{NoticeReceiver, NoticeSender, SkipReason, StoreNotice, notice_bus};
pub use traits::{EventHandler, HistoryReplacer, TransportSubscription, WorkspaceTransport};
