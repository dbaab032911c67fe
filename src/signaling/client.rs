use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::SignalingMessage;
use crate::error::{Error, Result};

pub struct SignalingClient {
    tx: mpsc::Sender<SignalingMessage>,
    rx: mpsc::Receiver<SignalingMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalingMessage>(100);

        // Outgoing
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("dropping unencodable signaling message: {}", e);
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Incoming
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match serde_json::from_str::<SignalingMessage>(&text) {
                    Ok(signal) => {
                        debug!("signaling <- {:?}", signal);
                        if tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("unparseable signaling message: {}", e),
                }
            }
        });

        Ok(Self {
            tx: outgoing_tx,
            rx,
        })
    }

    pub async fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|e| Error::Signaling(format!("failed to send message: {}", e)))
    }

    /// `None` once the socket is gone.
    pub async fn receive(&mut self) -> Option<SignalingMessage> {
        self.rx.recv().await
    }

    pub fn split(self) -> (mpsc::Sender<SignalingMessage>, mpsc::Receiver<SignalingMessage>) {
        (self.tx, self.rx)
    }
}
