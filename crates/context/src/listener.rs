//! Reconnecting WebSocket event listener.

use std::{sync::Arc, time::Duration};

use {
    futures::StreamExt,
    secrecy::{ExposeSecret, Secret},
    tokio::{net::TcpStream, task::JoinHandle},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{
            Message as WsMessage,
            client::IntoClientRequest,
            http::{HeaderValue, header::AUTHORIZATION},
        },
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{Context, Result},
    manager::ContextManager,
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type EventStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to the running listener task.
pub(crate) struct Listener {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Listener {
    pub(crate) fn spawn(
        manager: Arc<ContextManager>,
        url: String,
        access_token: Option<Secret<String>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(manager, url, access_token, cancel.clone()));
        Self { cancel, task }
    }

    /// Cancel the task and wait for it to exit.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            error!(error = %e, "event listener task panicked");
        }
    }
}

/// Connect, read frames until the stream ends, back off, repeat.
async fn run(
    manager: Arc<ContextManager>,
    url: String,
    access_token: Option<Secret<String>>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::default();
    loop {
        let connected = tokio::select! {
            () = cancel.cancelled() => return,
            result = connect(&url, access_token.as_ref()) => result,
        };
        match connected {
            Ok(mut stream) => {
                info!(url = %url, "event stream connected");
                backoff.reset();
                loop {
                    let frame = tokio::select! {
                        () = cancel.cancelled() => {
                            let _ = stream.close(None).await;
                            return;
                        },
                        frame = stream.next() => frame,
                    };
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            // Reply and forward expansion may issue remote calls.
                            tokio::select! {
                                () = cancel.cancelled() => {
                                    let _ = stream.close(None).await;
                                    return;
                                },
                                () = manager.handle_frame(text.as_str()) => {},
                            }
                        },
                        Some(Ok(WsMessage::Close(_))) | None => {
                            warn!("event stream closed by server");
                            break;
                        },
                        Some(Ok(_)) => {},
                        Some(Err(e)) => {
                            warn!(error = %e, "event stream read failed");
                            break;
                        },
                    }
                }
            },
            Err(e) => warn!(url = %url, error = %e, "event stream connection failed"),
        }

        let delay = backoff.advance();
        debug!(delay_ms = delay.as_millis() as u64, "reconnecting to event stream");
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {},
        }
    }
}

/// Reconnect delay: starts at [`INITIAL_BACKOFF`], doubles per failed
/// attempt up to [`MAX_BACKOFF`], back to the start after a connect.
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }

    /// The delay to wait now.
    fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = next_backoff(delay);
        delay
    }
}

fn next_backoff(current: Duration) -> Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

async fn connect(url: &str, access_token: Option<&Secret<String>>) -> Result<EventStream> {
    let mut request = url.into_client_request()?;
    if let Some(token) = access_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .context("access token is not a valid header value")?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    let (stream, _response) = connect_async(request).await?;
    Ok(stream)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::FakeApi,
        futures::SinkExt,
        qq_agent_common::types::TargetKey,
        qq_agent_config::AgentConfig,
        qq_agent_onebot::OneBotApi,
        serde_json::json,
        tokio::{net::TcpListener, sync::mpsc},
        tokio_tungstenite::accept_async,
    };

    fn frame(id: i64, text: &str) -> String {
        json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": 100,
            "user_id": 7,
            "message_id": id,
            "time": 1_700_000_000,
            "sender": {"user_id": 7, "nickname": "seven"},
            "message": [{"type": "text", "data": {"text": text}}],
        })
        .to_string()
    }

    /// Accepts connections one by one; each sends its batch of frames, then
    /// either closes or stays open. Reports every accepted connection.
    async fn serve(batches: Vec<(Vec<String>, bool)>) -> (u16, mpsc::UnboundedReceiver<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for (n, (frames, close)) in batches.into_iter().enumerate() {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(tcp).await.unwrap();
                let _ = tx.send(n);
                for f in frames {
                    ws.send(WsMessage::text(f)).await.unwrap();
                }
                if close {
                    let _ = ws.close(None).await;
                } else {
                    tokio::spawn(async move { while ws.next().await.is_some() {} });
                }
            }
        });
        (port, rx)
    }

    fn manager(port: u16) -> Arc<ContextManager> {
        manager_with(port, FakeApi::default())
    }

    fn manager_with(port: u16, api: FakeApi) -> Arc<ContextManager> {
        let mut config = AgentConfig::default();
        config.account.qq = "10001".into();
        config.napcat.host = "127.0.0.1".into();
        config.napcat.ws_port = port;
        Arc::new(ContextManager::new(
            &config,
            Arc::new(api) as Arc<dyn OneBotApi>,
        ))
    }

    async fn wait_for(manager: &ContextManager, count: usize) {
        let key = TargetKey::group("100");
        tokio::time::timeout(Duration::from_secs(10), async {
            while manager.get_context(&key, 100).total_count < count {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("messages did not arrive in time");
    }

    #[tokio::test]
    async fn buffers_frames_and_skips_bad_json() {
        let (port, _accepted) =
            serve(vec![(vec!["{oops".into(), frame(1, "hello")], false)]).await;
        let mgr = manager(port);
        mgr.start();
        mgr.start();
        assert!(mgr.is_running());

        wait_for(&mgr, 1).await;
        let ctx = mgr.get_context(&TargetKey::group("100"), 10);
        assert_eq!(ctx.messages[0].content, "hello");
        assert_eq!(ctx.messages[0].sender_name, "seven");

        mgr.stop().await;
        assert!(!mgr.is_running());
        mgr.stop().await;
    }

    #[tokio::test]
    async fn reconnects_after_server_close() {
        let (port, mut accepted) = serve(vec![
            (vec![frame(1, "first")], true),
            (vec![frame(2, "second")], false),
        ])
        .await;
        let mgr = manager(port);
        mgr.start();

        wait_for(&mgr, 2).await;
        assert_eq!(accepted.recv().await, Some(0));
        assert_eq!(accepted.recv().await, Some(1));
        mgr.stop().await;
    }

    #[tokio::test]
    async fn stop_interrupts_backoff() {
        // Nothing listens on this port once the placeholder socket is dropped.
        let port = {
            let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
            placeholder.local_addr().unwrap().port()
        };
        let mgr = manager(port);
        mgr.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(2), mgr.stop())
            .await
            .expect("stop should not wait out the backoff");
        assert!(!mgr.is_running());
    }

    #[tokio::test]
    async fn stop_interrupts_frame_waiting_on_remote_fetch() {
        let reply = json!({
            "post_type": "message",
            "message_type": "group",
            "group_id": 100,
            "user_id": 7,
            "message_id": 5,
            "time": 1_700_000_000,
            "sender": {"user_id": 7, "nickname": "seven"},
            "message": [{"type": "reply", "data": {"id": "99"}}],
        })
        .to_string();
        let (port, mut accepted) = serve(vec![(vec![reply], false)]).await;
        let mgr = manager_with(port, FakeApi::default().with_slow_get_msg(Duration::from_secs(30)));
        mgr.start();
        assert_eq!(accepted.recv().await, Some(0));
        tokio::time::sleep(Duration::from_millis(300)).await;

        tokio::time::timeout(Duration::from_secs(2), mgr.stop())
            .await
            .expect("stop should not wait for the reply lookup");
        assert!(!mgr.is_running());
    }

    #[tokio::test]
    async fn reconnect_delay_resets_after_a_connection() {
        let (port, mut accepted) = serve(vec![
            (Vec::new(), true),
            (Vec::new(), true),
            (Vec::new(), false),
        ])
        .await;
        let mgr = manager(port);
        mgr.start();

        assert_eq!(accepted.recv().await, Some(0));
        assert_eq!(accepted.recv().await, Some(1));
        let second = std::time::Instant::now();
        assert_eq!(accepted.recv().await, Some(2));
        // A doubled delay would be 2s here.
        assert!(second.elapsed() < Duration::from_millis(1800));
        mgr.stop().await;
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..8).map(|_| backoff.advance().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.advance(), INITIAL_BACKOFF);
        assert_eq!(next_backoff(Duration::from_secs(20)), MAX_BACKOFF);
    }
}
