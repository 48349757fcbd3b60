//! 房间广播总线
//!
//! 每个连接登记一个有界发送队列，广播时对房间成员做快照后逐个 `try_send`。
//! 队列满或已关闭的连接直接跳过，不会拖慢其他成员，也不会阻塞调用方。

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use domain::{ConnectionId, RoomId};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::events::ServerEvent;

pub type EventSender = mpsc::Sender<Arc<ServerEvent>>;
pub type EventReceiver = mpsc::Receiver<Arc<ServerEvent>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("outbound queue of connection {0} is full")]
    QueueFull(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// 一次广播的投递结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub skipped: usize,
}

struct ConnectionSlot {
    sender: EventSender,
    rooms: HashSet<RoomId>,
}

/// 锁顺序固定为 connections -> rooms，广播路径只读取快照，不同时持有两边的锁。
pub struct RoomBroadcastBus {
    connections: DashMap<ConnectionId, ConnectionSlot>,
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
    buffer: usize,
}

impl RoomBroadcastBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// 登记连接并返回它的事件接收端；重复登记会替换旧队列
    pub fn register(&self, connection_id: ConnectionId) -> EventReceiver {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let previous = self.connections.insert(
            connection_id,
            ConnectionSlot {
                sender,
                rooms: HashSet::new(),
            },
        );
        if let Some(previous) = previous {
            self.detach_rooms(connection_id, previous.rooms);
        }
        receiver
    }

    /// 注销连接并退出它加入的所有房间，返回退出的房间
    pub fn unregister(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        match self.connections.remove(&connection_id) {
            Some((_, slot)) => {
                let rooms: Vec<RoomId> = slot.rooms.iter().cloned().collect();
                self.detach_rooms(connection_id, slot.rooms);
                rooms
            }
            None => Vec::new(),
        }
    }

    /// 加入房间，返回是否为新加入
    pub fn join(&self, connection_id: ConnectionId, room_id: RoomId) -> Result<bool, BroadcastError> {
        let mut slot = self
            .connections
            .get_mut(&connection_id)
            .ok_or(BroadcastError::UnknownConnection(connection_id))?;
        let joined = slot.rooms.insert(room_id.clone());
        // 持有连接槽的同时写入房间表，避免与并发的注销交错后留下残余成员
        self.rooms.entry(room_id).or_default().insert(connection_id);
        Ok(joined)
    }

    /// 离开房间，返回连接之前是否在房间内
    pub fn leave(&self, connection_id: ConnectionId, room_id: &RoomId) -> bool {
        let was_member = match self.connections.get_mut(&connection_id) {
            Some(mut slot) => {
                let removed = slot.rooms.remove(room_id);
                self.remove_member(connection_id, room_id);
                removed
            }
            None => {
                self.remove_member(connection_id, room_id);
                false
            }
        };
        self.prune_room(room_id);
        was_member
    }

    pub fn members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, connection_id: ConnectionId, room_id: &RoomId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|members| members.contains(&connection_id))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// 投递给房间当前的全部成员
    pub fn broadcast(&self, room_id: &RoomId, event: ServerEvent) -> DeliveryReport {
        let targets = self.members(room_id);
        self.deliver(&targets, Arc::new(event))
    }

    /// 投递给房间成员，排除发起连接
    pub fn broadcast_except(
        &self,
        room_id: &RoomId,
        except: ConnectionId,
        event: ServerEvent,
    ) -> DeliveryReport {
        let mut targets = self.members(room_id);
        targets.retain(|id| *id != except);
        self.deliver(&targets, Arc::new(event))
    }

    /// 投递给所有已登记的连接
    pub fn broadcast_all(&self, event: ServerEvent) -> DeliveryReport {
        let targets: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        self.deliver(&targets, Arc::new(event))
    }

    /// 只投递给一个连接
    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> Result<(), BroadcastError> {
        self.try_deliver(connection_id, Arc::new(event))
    }

    fn deliver(&self, targets: &[ConnectionId], event: Arc<ServerEvent>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for connection_id in targets {
            match self.try_deliver(*connection_id, Arc::clone(&event)) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.skipped += 1;
                    warn!(
                        connection_id = %connection_id,
                        event = event.kind(),
                        error = %err,
                        "跳过无法投递的连接"
                    );
                }
            }
        }
        if report.skipped > 0 {
            debug!(
                event = event.kind(),
                delivered = report.delivered,
                skipped = report.skipped,
                "广播部分投递失败"
            );
        }
        report
    }

    fn try_deliver(&self, connection_id: ConnectionId, event: Arc<ServerEvent>) -> Result<(), BroadcastError> {
        let slot = self
            .connections
            .get(&connection_id)
            .ok_or(BroadcastError::UnknownConnection(connection_id))?;
        slot.sender.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => BroadcastError::QueueFull(connection_id),
            TrySendError::Closed(_) => BroadcastError::Closed(connection_id),
        })
    }

    fn detach_rooms(&self, connection_id: ConnectionId, rooms: HashSet<RoomId>) {
        for room_id in rooms {
            self.remove_member(connection_id, &room_id);
            self.prune_room(&room_id);
        }
    }

    fn remove_member(&self, connection_id: ConnectionId, room_id: &RoomId) {
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(&connection_id);
        }
    }

    fn prune_room(&self, room_id: &RoomId) {
        self.rooms.remove_if(room_id, |_, members| members.is_empty());
    }
}
