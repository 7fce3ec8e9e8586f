//! Demo client: sends a JSON hello message at a fixed interval and prints each reply.

use std::time::Duration;

use clap::Parser;
use framelink::{setup_local_tracing, AppError, AppResult, FrameCodec, HelloMessage, MSG_HELLO_WORLD};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{info, warn};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// server address
    #[arg(short, long, default_value = "127.0.0.1:8888")]
    pub addr: String,
    #[arg(short, long, default_value_t = MSG_HELLO_WORLD)]
    pub message_id: u16,
    /// payload carried in the `data` field
    #[arg(short, long, default_value = "hello world")]
    pub data: String,
    /// number of requests to send
    #[arg(short = 'n', long, default_value_t = 5)]
    pub count: u32,
    #[arg(short, long, default_value_t = 2000)]
    pub interval_ms: u64,
}

fn main() -> AppResult<()> {
    setup_local_tracing()?;
    let commandline = CommandLine::parse();
    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run(commandline))
}

async fn run(commandline: CommandLine) -> AppResult<()> {
    let stream = TcpStream::connect(&commandline.addr).await.map_err(|e| {
        AppError::TransportError(format!("connect to {} failed: {}", commandline.addr, e))
    })?;
    info!("connected to {}", commandline.addr);
    let (reader, mut writer) = stream.into_split();

    let codec = FrameCodec::default();
    let mut replies = FramedRead::new(reader, FrameCodec::default());

    let mut ticker = tokio::time::interval(Duration::from_millis(commandline.interval_ms));
    for seq in 0..commandline.count {
        ticker.tick().await;

        let request = HelloMessage {
            id: i64::from(seq),
            data: commandline.data.clone(),
        };
        let frame = codec.encode(commandline.message_id, &serde_json::to_vec(&request)?)?;
        writer.write_all(&frame).await?;

        match replies.next().await {
            Some(Ok(reply)) => match serde_json::from_slice::<HelloMessage>(&reply.body) {
                Ok(message) => info!(
                    seq,
                    message_id = reply.message_id,
                    id = message.id,
                    data = %message.data,
                    "reply"
                ),
                Err(_) => info!(
                    seq,
                    message_id = reply.message_id,
                    body = %String::from_utf8_lossy(&reply.body),
                    "reply"
                ),
            },
            Some(Err(err)) => return Err(err),
            None => {
                warn!("server closed the connection");
                break;
            }
        }
    }

    writer.shutdown().await?;
    Ok(())
}
