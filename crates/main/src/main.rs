//! 主应用程序入口
//!
//! 加载配置、组装存储与推送适配器，启动 Axum 实时消息服务。

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, with_http_layers, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let infra = Infrastructure::connect(&config)
        .await
        .context("初始化存储失败")?;
    tracing::info!(backend = ?infra.backend, push_enabled = infra.notifier.is_enabled(), "基础设施就绪");

    let hub = infra.build_hub(config.realtime.connection_buffer);
    let jwt_service = Arc::new(JwtService::new(&config.jwt));
    let state = AppState::new(hub, infra.health.clone(), jwt_service);
    let app = with_http_layers(router(state), &config.server);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("无法监听 {address}"))?;
    tracing::info!(address = %address, "聊天室服务器已启动");

    let grace = Duration::from_secs(config.realtime.shutdown_grace_seconds);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(grace))
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM。活跃的 WebSocket 连接会阻止停机，超过宽限期后强制退出。
async fn shutdown_signal(grace: Duration) {
    wait_for_signal().await;
    tracing::info!(grace_seconds = grace.as_secs(), "接收到关闭信号，开始优雅停机");

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        tracing::warn!("优雅停机超时，强制退出");
        std::process::exit(1);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sig_term = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            tracing::warn!(?error, "无法监听 SIGTERM，仅响应 Ctrl+C");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c() => {}
        _ = sig_term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "无法监听 Ctrl+C 信号");
        std::future::pending::<()>().await;
    }
}
