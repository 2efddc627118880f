//! 一次性 REST 命令：list / mark-read / dismiss / hint

use crate::cli::output::{format_alert_list, format_output};
use crate::config::CenterConfig;
use crate::notification::{HintRequest, HttpRemote, RemoteApi};
use anyhow::{anyhow, Result};
use serde::Serialize;

/// List 命令输出
#[derive(Debug, Serialize)]
pub struct ListOutput {
    pub subscriber_id: String,
    pub unread_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_unread: Option<usize>,
    pub notifications: Vec<crate::notification::Alert>,
}

/// 列出服务端已有告警
pub async fn handle_list(config: &CenterConfig, json: bool) -> Result<()> {
    let subscriber_id = config.require_subscriber()?;
    let remote = HttpRemote::from_config(config)?;
    let page = remote.list(subscriber_id).await?;

    let unread_count = page.notifications.iter().filter(|a| a.is_unread()).count();
    if json {
        let output = ListOutput {
            subscriber_id: subscriber_id.to_string(),
            unread_count,
            server_unread: page.unread_count,
            notifications: page.notifications,
        };
        println!("{}", format_output(&output, true));
    } else {
        println!("{}", format_alert_list(&page.notifications));
        println!("\n{} unread", unread_count);
    }
    Ok(())
}

pub async fn handle_mark_read(config: &CenterConfig, id: &str) -> Result<()> {
    let subscriber_id = config.require_subscriber()?;
    HttpRemote::from_config(config)?
        .mark_read(id, subscriber_id)
        .await?;
    println!("Marked {} as read", id);
    Ok(())
}

pub async fn handle_dismiss(config: &CenterConfig, id: &str) -> Result<()> {
    let subscriber_id = config.require_subscriber()?;
    HttpRemote::from_config(config)?
        .dismiss(id, subscriber_id)
        .await?;
    println!("Dismissed {}", id);
    Ok(())
}

/// 发送实时提示；未指定 target 时从告警列表中查找
pub async fn handle_hint(
    config: &CenterConfig,
    id: &str,
    target: Option<String>,
    message: Option<String>,
) -> Result<()> {
    let remote = HttpRemote::from_config(config)?;

    let target_id = match target {
        Some(target) => target,
        None => {
            let subscriber_id = config.require_subscriber()?;
            let page = remote.list(subscriber_id).await?;
            page.notifications
                .iter()
                .find(|a| a.id == id)
                .ok_or_else(|| anyhow!("alert not found: {}", id))?
                .target_identity()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("alert {} has no target identity, use --target", id))?
        }
    };

    let request = HintRequest {
        target_id: target_id.clone(),
        message: message.unwrap_or_else(|| config.hint_message.clone()),
        id: id.to_string(),
    };
    remote.send_hint(&request).await?;
    println!("Hint sent to {} for {}", target_id, id);
    Ok(())
}
