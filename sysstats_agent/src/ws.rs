//! WebSocket upgrade and per-connection handler.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::monotonic_ms;
use crate::monitor::CpuScale;
use crate::proto::parse_command;
use crate::session::Session;
use crate::state::{AppState, SessionTicket};

/// Subprotocol accepted when the client offers it.
pub const SUBPROTOCOL: &str = "sysstats";

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let ticket = match state.admit() {
        Ok(ticket) => ticket,
        Err(e) => {
            warn!("rejecting WebSocket client: {e}");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };
    // If the upgrade never completes the callback (and the ticket) is dropped,
    // which releases the pending slot.
    ws.protocols([SUBPROTOCOL])
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {e}"))
        .on_upgrade(move |socket| handle_socket(socket, state, ticket))
}

async fn handle_socket(socket: WebSocket, state: AppState, mut ticket: SessionTicket) {
    let counts = ticket.establish();
    info!(
        "WebSocket client connected ({}/{})",
        counts.connected(),
        counts.max_clients()
    );

    let mut session = Session::new(state.config.message_limit, state.config.list_limit);
    let scale = CpuScale::host();
    let (mut sender, mut receiver) = socket.split();

    // First tick fires immediately so a new client gets a frame right away.
    let mut send_tick = interval(state.config.send_interval);
    send_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = send_tick.tick() => {
                let view = state.view();
                let Some(frame) = session.render_snapshot(&view, &state.procfs, monotonic_ms(), scale) else {
                    continue;
                };
                if let Err(e) = sender.send(Message::Text(frame.to_owned())).await {
                    debug!("stats send failed: {e}");
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let command = match parse_command(&text) {
                        Ok(command) => command,
                        Err(e) => {
                            warn!("ignoring client command: {e}");
                            continue;
                        }
                    };
                    let Some(reply) = session.answer(command, &state.discovery) else {
                        continue;
                    };
                    if let Err(e) = sender.send(Message::Text(reply.to_owned())).await {
                        debug!("reply send failed: {e}");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket receive error: {e}");
                    break;
                }
            },
        }
    }

    let counts = ticket.close();
    info!(
        "WebSocket client disconnected ({}/{})",
        counts.connected(),
        counts.max_clients()
    );
}
