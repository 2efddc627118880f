//! Watch 命令 - 运行告警中心并打印变更事件

use crate::cli::output::{format_event, format_output};
use crate::config::CenterConfig;
use crate::notification::AlertCenter;
use anyhow::{anyhow, Result};
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Watch 命令参数
#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// 输出 JSON 格式（每行一个事件）
    #[arg(long)]
    pub json: bool,

    /// 启用桌面原生通知
    #[arg(long)]
    pub native: bool,
}

/// 处理 watch 命令，Ctrl+C 退出
pub async fn handle_watch(mut config: CenterConfig, args: WatchArgs) -> Result<()> {
    let subscriber_id = config.require_subscriber()?.to_string();
    if args.native {
        config.native_alerts = true;
    }

    let (center, handle) = AlertCenter::builder(subscriber_id.clone())
        .config(config)
        .build()?;
    let mut events = handle.subscribe();
    let mut task = center.spawn();
    handle.connect()?;
    info!(subscriber_id = %subscriber_id, "Watching alerts (Ctrl+C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            finished = &mut task => {
                // 事件循环意外退出（包括 panic）
                return match finished {
                    Ok(()) => Err(anyhow!("alert center stopped unexpectedly")),
                    Err(e) => Err(anyhow!("alert center task failed: {}", e)),
                };
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if args.json {
                        println!("{}", format_output(&event, false));
                    } else {
                        println!("{}", format_event(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event output lagging, some events were skipped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    // 中心可能已经停止
    let _ = handle.shutdown();
    let _ = task.await;
    Ok(())
}
