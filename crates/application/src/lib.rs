//! 应用层实现。
//!
//! 实时消息分发和在线状态协调：在线登记表、房间广播总线、消息管线、
//! 推送派发器，以及把这些组件串起来的连接会话。仓储和推送投递通过 trait 抽象，
//! 具体实现由基础设施层提供。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod events;
pub mod notification;
pub mod presence;
pub mod repository;
pub mod services;
pub mod session;

pub use broadcaster::{BroadcastError, DeliveryReport, EventReceiver, RoomBroadcastBus};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use events::{
    ClientEvent, MessageReference, MessageView, ReadIntent, ReadReceipt, SendMessageIntent,
    SenderProfile, ServerEvent, TypingSignal,
};
pub use notification::{
    DeliveryError, DispatchOutcome, NotificationDispatcher, NotificationPayload, PushSender,
};
pub use presence::{memory::MemoryPresenceRegistry, PresenceRegistry};
pub use repository::{
    memory::MemoryStorage, ChatRoomRepository, MessageRepository, StorageHealth, UserRepository,
};
pub use services::{MessagePipeline, MessagePipelineDependencies};
pub use session::{AuthenticatedIdentity, ChatHub, ConnectionSession, SessionContext, SessionState};
