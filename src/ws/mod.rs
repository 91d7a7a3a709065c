//! Live channel (C4/C9 public surface). Namespace `/blockchain`:
//! clients send plain-text commands (`join:blocks`, `leave:address(<addr>)`, `ping`,
//! …) and receive JSON event envelopes. Grounded on the `tokio::sync::broadcast`
//! per-room fanout already built in `broadcaster/mod.rs`; this module is the thin
//! warp `ws::WebSocket` adapter around it, in the spirit of
//! `other_examples/.../web3_proxy-src-app.rs`'s `broadcast`-channel-per-connection wiring.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::broadcaster::{address_room, Broadcaster, ROOM_BLOCKS, ROOM_TRANSACTIONS};
use crate::events::BroadcastEvent;
use crate::metrics;

pub fn route(broadcaster: Arc<Broadcaster>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path("blockchain")
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let broadcaster = broadcaster.clone();
            ws.on_upgrade(move |socket| handle_connection(socket, broadcaster))
        })
}

async fn handle_connection(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    metrics::WS_CONNECTIONS.inc();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    let forward = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut joined: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(next) = ws_rx.next().await {
        let msg = match next {
            Ok(m) => m,
            Err(_) => break,
        };
        let Ok(text) = msg.to_str() else { continue };
        handle_command(text, &broadcaster, &out_tx, &mut joined);
    }

    for (_, handle) in joined {
        handle.abort();
    }
    forward.abort();
    metrics::WS_CONNECTIONS.dec();
}

fn address_command_re() -> Regex {
    Regex::new(r"^(join|leave):address\((.+)\)$").expect("static regex is valid")
}

fn handle_command(text: &str, broadcaster: &Arc<Broadcaster>, out_tx: &mpsc::UnboundedSender<Message>, joined: &mut HashMap<String, JoinHandle<()>>) {
    match text {
        "ping" => send_json(out_tx, "pong", serde_json::Value::Null),
        "join:blocks" => join_room(ROOM_BLOCKS, broadcaster, out_tx, joined),
        "leave:blocks" => leave_room(ROOM_BLOCKS, out_tx, joined),
        "join:transactions" => join_room(ROOM_TRANSACTIONS, broadcaster, out_tx, joined),
        "leave:transactions" => leave_room(ROOM_TRANSACTIONS, out_tx, joined),
        "get:status" => send_json(
            out_tx,
            "blockchain:status",
            serde_json::json!({"rooms": joined.keys().collect::<Vec<_>>()}),
        ),
        other => {
            if let Some(caps) = address_command_re().captures(other) {
                let room = address_room(&caps[2]);
                match &caps[1] {
                    "join" => join_room(&room, broadcaster, out_tx, joined),
                    _ => leave_room(&room, out_tx, joined),
                }
            } else {
                send_json(out_tx, "error", serde_json::json!({"message": format!("unknown command `{other}`")}));
            }
        }
    }
}

fn join_room(room: &str, broadcaster: &Arc<Broadcaster>, out_tx: &mpsc::UnboundedSender<Message>, joined: &mut HashMap<String, JoinHandle<()>>) {
    if joined.contains_key(room) {
        return;
    }
    let broadcaster = broadcaster.clone();
    let room_owned = room.to_string();
    let out_tx = out_tx.clone();
    let handle = tokio::spawn(async move {
        let mut rx = broadcaster.join(&room_owned).await;
        loop {
            match rx.recv().await {
                Ok(event) => send_json(&out_tx, event_name(&event), event_payload(&event)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    joined.insert(room.to_string(), handle);
    send_json(out_tx, "room:joined", serde_json::json!({"room": room}));
}

fn leave_room(room: &str, out_tx: &mpsc::UnboundedSender<Message>, joined: &mut HashMap<String, JoinHandle<()>>) {
    if let Some(handle) = joined.remove(room) {
        handle.abort();
    }
    send_json(out_tx, "room:left", serde_json::json!({"room": room}));
}

fn event_name(event: &BroadcastEvent) -> &'static str {
    match event {
        BroadcastEvent::NewBlock { .. } => "blockchain:newBlock",
        BroadcastEvent::BlockFinalized { .. } => "blockchain:blockFinalized",
        BroadcastEvent::BlockDetails(_) => "blockchain:blockDetails",
        BroadcastEvent::NewTransaction(_) => "blockchain:newTransaction",
        BroadcastEvent::AddressTransaction { .. } => "blockchain:addressTransaction",
    }
}

fn event_payload(event: &BroadcastEvent) -> serde_json::Value {
    match event {
        BroadcastEvent::NewBlock { number, hash } => serde_json::json!({"number": number, "hash": hash}),
        BroadcastEvent::BlockFinalized { number, hash } => serde_json::json!({"number": number, "hash": hash}),
        BroadcastEvent::BlockDetails(details) => serde_json::to_value(details).unwrap_or_default(),
        BroadcastEvent::NewTransaction(tx) => serde_json::to_value(tx).unwrap_or_default(),
        BroadcastEvent::AddressTransaction { address, tx } => {
            serde_json::json!({"address": address, "tx": serde_json::to_value(tx).unwrap_or_default()})
        }
    }
}

fn send_json(out_tx: &mpsc::UnboundedSender<Message>, event: &str, data: serde_json::Value) {
    let body = serde_json::json!({"event": event, "data": data});
    let _ = out_tx.send(Message::text(body.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_command_regex_extracts_join_leave_and_address() {
        let re = address_command_re();
        let caps = re.captures("join:address(5Grwv...)").unwrap();
        assert_eq!(&caps[1], "join");
        assert_eq!(&caps[2], "5Grwv...");

        let caps = re.captures("leave:address(5Grwv...)").unwrap();
        assert_eq!(&caps[1], "leave");
    }

    #[test]
    fn event_name_matches_spec_surface() {
        assert_eq!(event_name(&BroadcastEvent::NewBlock { number: 1, hash: "0x0".into() }), "blockchain:newBlock");
    }
}
