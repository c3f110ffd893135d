use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use omni_lyrics_rs::app::{App, Mode};
use omni_lyrics_rs::config::Config;
use omni_lyrics_rs::server::{send_command, ControlCommand};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// 显示模式
    #[arg(short, long, value_enum, default_value_t = Mode::Default)]
    mode: Mode,

    /// 执行一次控制命令后退出：play、pause、toggle、next、prev、seek
    #[arg(short, long, value_name = "COMMAND", conflicts_with = "send")]
    control: Option<String>,

    /// 把控制命令发送给正在运行的实例
    #[arg(long, value_name = "COMMAND")]
    send: Option<String>,

    /// seek 的目标位置（秒）
    #[arg(value_name = "SECONDS", allow_negative_numbers = true)]
    seconds: Option<f64>,

    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,

    /// 启用逐字歌词
    #[arg(long)]
    karaoke: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = Config::load(args.config.clone())?;
    if args.karaoke {
        config.display.karaoke = true;
    }
    let config = Arc::new(config);

    if let Some(name) = &args.send {
        let command = ControlCommand::from_parts(name, args.seconds)?;
        return send_command(config.server.control_port, &command).await;
    }

    let app = App::new(Arc::clone(&config));

    if let Some(name) = &args.control {
        let command = ControlCommand::from_parts(name, args.seconds)?;
        return app.control(command).await;
    }

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("收到退出信号");
                signal_token.cancel();
            }
            Err(e) => error!("无法监听退出信号: {}", e),
        }
    });

    app.run(args.mode, token).await
}
