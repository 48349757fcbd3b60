use std::ops::ControlFlow;
use std::sync::Arc;

use application::{AuthenticatedIdentity, ChatHub, ConnectionSession, EventReceiver};
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// WebSocket 连接
///
/// 把 socket 适配到 `ConnectionSession`：
/// - 发送任务独占写端，转发会话的出站事件和心跳回应
/// - 接收循环把文本帧交给会话处理
/// - 任意一端结束即断开，并清理在线状态和房间成员
pub struct WebSocketConnection {
    socket: WebSocket,
    session: ConnectionSession,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, hub: Arc<ChatHub>, identity: AuthenticatedIdentity) -> Self {
        Self {
            socket,
            session: ConnectionSession::new(hub, identity),
        }
    }

    pub async fn run(self) {
        let Self { socket, mut session } = self;
        let events = match session.establish().await {
            Ok(events) => events,
            Err(err) => {
                tracing::error!(error = %err, "会话建立失败");
                return;
            }
        };
        let connection_id = session.connection_id();

        let (sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(32);
        let mut send_task = tokio::spawn(write_loop(sender, cmd_rx, events));

        let recv_loop = async {
            while let Some(frame) = incoming.next().await {
                let message = match frame {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::debug!(connection_id = %connection_id, error = %err, "WebSocket 传输错误");
                        break;
                    }
                };
                if handle_incoming(&session, message, &cmd_tx).await.is_break() {
                    break;
                }
            }
        };

        // 等待任意一端结束（连接断开）
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(connection_id = %connection_id, "WebSocket发送任务结束");
            }
            _ = recv_loop => {
                tracing::debug!(connection_id = %connection_id, "WebSocket接收循环结束");
            }
        }
        send_task.abort();

        session.terminate().await;
    }
}

/// 统一处理所有对 WebSocket sender 的写操作
async fn write_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, WsMessage>,
    mut cmd_rx: mpsc::Receiver<WsCommand>,
    mut events: EventReceiver,
) {
    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    WsCommand::SendPong(data) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            tracing::warn!("Failed to send pong message");
                            break;
                        }
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    // 会话已从广播总线注销
                    break;
                };
                let payload = match serde_json::to_string(event.as_ref()) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to serialize websocket payload");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    tracing::debug!("Failed to send text message");
                    break;
                }
            }
        }
    }
    let _ = sender.close().await;
}

/// 处理来自客户端的帧
async fn handle_incoming(
    session: &ConnectionSession,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> ControlFlow<()> {
    match message {
        WsMessage::Text(text) => session.handle_text(text.as_str()).await,
        WsMessage::Binary(data) => match std::str::from_utf8(&data) {
            Ok(text) => session.handle_text(text).await,
            Err(_) => tracing::debug!("忽略非 UTF-8 二进制帧"),
        },
        WsMessage::Ping(data) => {
            if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                return ControlFlow::Break(());
            }
        }
        WsMessage::Pong(_) => {
            tracing::debug!("收到pong消息");
        }
        WsMessage::Close(_) => {
            tracing::debug!("WebSocket收到关闭消息");
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
}
