//! WebSocket handlers for viewers and client list watchers

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::protocol::{RelayMessage, ViewerControl};
use crate::relay::{ChannelSink, Dispatcher, ViewerId, ViewerSink};
use crate::server::http::AppState;

/// `/ws` upgrade handler
pub async fn viewer_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

/// `/ws/clients` upgrade handler
pub async fn watcher_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_watcher(socket, state))
}

/// Handle a viewer connection
async fn handle_viewer(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (sink, mut outbox) = ChannelSink::channel(state.config.viewer_queue_capacity);
    let sink = Arc::new(sink);
    let dispatcher = state.dispatcher.clone();
    let viewer_id = dispatcher.registry().register_viewer(sink.clone());
    tracing::info!("Viewer connected: {}", viewer_id);

    // Send initial client list
    if let Some(frame) = dispatcher.source_list_frame() {
        let _ = sink.send(frame);
    }

    // Drain the outbox into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbox.next().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    // Handle incoming control messages
    let recv_dispatcher = dispatcher.clone();
    let reply_sink = sink.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_control_text(&recv_dispatcher, viewer_id, &text, reply_sink.as_ref());
                }
                Message::Close(_) => break,
                _ => {
                    // Binary frames carry nothing for the relay; pings are answered by axum
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    dispatcher.registry().unregister_viewer(viewer_id);
    tracing::info!("Viewer disconnected: {}", viewer_id);
}

/// Apply one text frame from a viewer and queue the reply, if any
fn handle_control_text(dispatcher: &Dispatcher, viewer_id: ViewerId, text: &str, reply_to: &dyn ViewerSink) {
    let control = match serde_json::from_str::<ViewerControl>(text) {
        Ok(control) => control,
        Err(e) => {
            tracing::debug!("Ignoring malformed message from viewer {}: {}", viewer_id, e);
            return;
        }
    };

    if let Some(reply) = dispatcher.handle_control(viewer_id, control) {
        send_reply(reply_to, &reply);
    }
}

fn send_reply(sink: &dyn ViewerSink, reply: &RelayMessage) {
    match reply.to_json() {
        Ok(json) => {
            let _ = sink.send(json.into());
        }
        Err(e) => tracing::warn!("Failed to encode reply: {}", e),
    }
}

/// Push the client list on connect and then periodically, until the peer leaves
async fn handle_watcher(mut socket: WebSocket, state: Arc<AppState>) {
    tracing::debug!("Client list watcher connected");
    let mut ticker = tokio::time::interval(state.config.watch_refresh());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(frame) = state.dispatcher.source_list_frame() else {
                    continue;
                };
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("Client list watcher disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::protocol::AudioFormat;
    use crate::relay::{Registry, SourceUpdate};
    use crate::server::RelayServer;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn start_relay() -> (String, Arc<AppState>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = RelayServer::new(RelayConfig::default());
        let state = server.state();
        tokio::spawn(async move { server.serve(listener, std::future::pending::<()>()).await });
        (format!("ws://{}", addr), state)
    }

    async fn next_json(client: &mut Client) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .expect("timed out waiting for a frame")
                .unwrap()
                .unwrap();
            if let tungstenite::Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Poll `condition` for up to two seconds
    async fn wait_until(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_control_frames_update_viewer() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        dispatcher.ingest(SourceUpdate::new("m1", AudioFormat::new(48_000, 1, 16), Bytes::from_static(&[0; 4])));

        let (sink, mut outbox) = ChannelSink::channel(8);
        let sink = Arc::new(sink);
        let viewer_id = dispatcher.registry().register_viewer(sink.clone());

        handle_control_text(
            &dispatcher,
            viewer_id,
            r#"{"type":"selectSources","selectedSources":{"m1":true,"m2":false}}"#,
            sink.as_ref(),
        );
        handle_control_text(&dispatcher, viewer_id, r#"{"type":"setVolume","volume":0.5}"#, sink.as_ref());
        handle_control_text(&dispatcher, viewer_id, "garbage", sink.as_ref());
        handle_control_text(&dispatcher, viewer_id, r#"{"type":"ping"}"#, sink.as_ref());

        let info = dispatcher.registry().viewer(viewer_id).unwrap();
        assert_eq!(info.selected_sources, vec!["m1"]);
        assert_eq!(info.volume, 0.5);

        let pong = outbox.next().await.unwrap();
        assert_eq!(&*pong, r#"{"type":"pong"}"#);

        dispatcher.ingest(SourceUpdate::new("m1", AudioFormat::new(48_000, 1, 16), Bytes::from_static(&[0; 4])));
        let audio: serde_json::Value = serde_json::from_str(&outbox.next().await.unwrap()).unwrap();
        assert_eq!(audio["type"], "audio");
        assert_eq!(audio["clientId"], "m1");
    }

    #[tokio::test]
    async fn test_request_client_list_reply() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        let (sink, mut outbox) = ChannelSink::channel(8);
        let viewer_id = dispatcher.registry().register_viewer(Arc::new(ChannelSink::channel(1).0));

        handle_control_text(&dispatcher, viewer_id, r#"{"type":"requestClientList"}"#, &sink);
        let list: serde_json::Value = serde_json::from_str(&outbox.next().await.unwrap()).unwrap();
        assert_eq!(list["type"], "clientList");
        assert!(list["audioClients"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_viewer_socket_lifecycle() {
        let (url, state) = start_relay().await;
        state
            .dispatcher
            .ingest(SourceUpdate::new("m1", AudioFormat::new(48_000, 1, 16), Bytes::from_static(&[0; 4])));

        let (mut client, _) = connect_async(format!("{}/ws", url)).await.unwrap();
        let first = next_json(&mut client).await;
        assert_eq!(first["type"], "clientList");
        assert_eq!(first["audioClients"][0]["id"], "m1");
        assert_eq!(state.registry().viewer_count(), 1);

        client
            .send(tungstenite::Message::Text(
                r#"{"type":"selectSources","selectedSources":{"m1":true}}"#.to_string(),
            ))
            .await
            .unwrap();
        let registry = state.registry().clone();
        assert!(wait_until(|| registry.viewers().iter().any(|v| v.selected_sources == ["m1"])).await);

        state
            .dispatcher
            .ingest(SourceUpdate::new("m1", AudioFormat::new(48_000, 1, 16), Bytes::from_static(&[1, 0])));
        let audio = next_json(&mut client).await;
        assert_eq!(audio["type"], "audio");
        assert_eq!(audio["clientId"], "m1");

        client.close(None).await.unwrap();
        assert!(wait_until(|| registry.viewer_count() == 0).await);
    }

    #[tokio::test]
    async fn test_watcher_gets_list_on_connect() {
        let (url, state) = start_relay().await;
        state
            .dispatcher
            .ingest(SourceUpdate::new("m2", AudioFormat::new(44_100, 2, 16), Bytes::from_static(&[0; 4])));

        let (mut client, _) = connect_async(format!("{}/ws/clients", url)).await.unwrap();
        let list = next_json(&mut client).await;
        assert_eq!(list["type"], "clientList");
        assert_eq!(list["audioClients"][0]["id"], "m2");

        // Watchers are not viewers
        assert_eq!(state.registry().viewer_count(), 0);
        client.close(None).await.unwrap();
    }
}
