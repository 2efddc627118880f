//! Notification Center CLI
//!
//! 订阅实时告警推送，并通过 REST 接口查询和处理告警

use anyhow::Result;
use clap::{Parser, Subcommand};
use notification_center::cli::{
    format_output, handle_dismiss, handle_hint, handle_list, handle_mark_read, handle_watch,
    GlobalArgs, WatchArgs,
};
use notification_center::CenterConfig;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ncenter")]
#[command(about = "Notification Center - 实时告警推送与生命周期管理")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 连接推送通道并持续打印告警事件
    Watch(WatchArgs),
    /// 列出服务端已有的告警
    List {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 将告警标记为已读
    MarkRead {
        /// 告警 id
        id: String,
    },
    /// 关闭告警
    Dismiss {
        /// 告警 id
        id: String,
    },
    /// 向告警关联的用户发送实时提示
    Hint {
        /// 告警 id
        id: String,
        /// 接收提示的用户 id（默认取告警上的 target）
        #[arg(long)]
        target: Option<String>,
        /// 提示内容（默认使用配置中的 hint_message）
        #[arg(long, short)]
        message: Option<String>,
    },
    /// 打印合并后的配置
    Config {
        /// 显示 token 原文
        #[arg(long)]
        show_token: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("notification_center=info,ncenter=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let config = cli.global.resolve()?;
    debug!(api = %config.api_base_url, ws = %config.ws_url_template, "Resolved config");

    match cli.command {
        Commands::Watch(args) => handle_watch(config, args).await?,
        Commands::List { json } => handle_list(&config, json).await?,
        Commands::MarkRead { id } => handle_mark_read(&config, &id).await?,
        Commands::Dismiss { id } => handle_dismiss(&config, &id).await?,
        Commands::Hint {
            id,
            target,
            message,
        } => handle_hint(&config, &id, target, message).await?,
        Commands::Config { show_token } => {
            let mut shown: CenterConfig = config;
            if !show_token && !shown.api_token.is_empty() {
                shown.api_token = "***".to_string();
            }
            println!("{}", format_output(&shown, true));
        }
    }

    Ok(())
}
