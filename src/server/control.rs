use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::server::command::ControlCommand;

/// UDP 控制服务器：每个数据报是一条文本命令
pub struct ControlServer {
    socket: UdpSocket,
    backend: Arc<dyn Backend>,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr, backend: Arc<dyn Backend>) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("无法绑定控制端口 {}", addr))?;
        Ok(Self { socket, backend })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 运行直到 `token` 被取消；命令按到达顺序逐条执行，无法解析的命令记录后忽略
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        info!("控制服务器监听: {}", self.local_addr()?);
        let mut buf = [0u8; 1024];

        loop {
            let (len, peer) = tokio::select! {
                _ = token.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("接收控制命令失败: {}", e);
                        continue;
                    }
                },
            };

            let text = String::from_utf8_lossy(&buf[..len]);
            match text.parse::<ControlCommand>() {
                Ok(command) => {
                    debug!("收到控制命令 {} 来自 {}", command, peer);
                    command.execute(self.backend.as_ref()).await;
                }
                Err(e) => warn!("忽略控制命令 {:?}: {}", text.trim(), e),
            }
        }
        Ok(())
    }
}

/// 把命令发送给正在运行的实例
pub async fn send_command(port: u16, command: &ControlCommand) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket
        .send_to(command.to_string().as_bytes(), ("127.0.0.1", port))
        .await
        .context("发送控制命令失败")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dynamic::tests::FakeBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn test_udp_commands_reach_backend() {
        let backend = FakeBackend::new("fake");
        let server = ControlServer::bind("127.0.0.1:0".parse().unwrap(), backend.clone())
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();

        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));

        send_command(port, &ControlCommand::Toggle).await.unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"bogus", ("127.0.0.1", port)).await.unwrap();
        send_command(port, &ControlCommand::Seek(Duration::from_secs(30)))
            .await
            .unwrap();

        for _ in 0..50 {
            if backend.commands().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(backend.commands(), vec!["toggle", "seek 30"]);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_commands_run_in_arrival_order() {
        let backend = FakeBackend::new("fake");
        let server = ControlServer::bind("127.0.0.1:0".parse().unwrap(), backend.clone())
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();

        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));

        let sequence = [
            ControlCommand::Pause,
            ControlCommand::Play,
            ControlCommand::Next,
            ControlCommand::Pause,
            ControlCommand::Prev,
            ControlCommand::Play,
        ];
        for command in &sequence {
            send_command(port, command).await.unwrap();
        }

        for _ in 0..50 {
            if backend.commands().len() >= sequence.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(
            backend.commands(),
            vec!["pause", "play", "next", "pause", "previous", "play"]
        );

        token.cancel();
        handle.await.unwrap().unwrap();
    }
}
