//! Browser Conversation Handler (spec §4.8, browser branch): owns the
//! browser WebSocket, forwards raw PCM to STT, streams TTS frames back.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use voice_agent_connection::{ConnectionKind, SessionEntry};
use voice_agent_core::audio::SampleRate;
use voice_agent_core::llm_types::Message as LlmMessage;
use voice_agent_core::traits::RecognizerWithPushStream;
use voice_agent_core::transcript::SpeechEventKind;
use voice_agent_turn::{Memory, TurnRouter};

use crate::barge_in;
use crate::egress::{self, BrowserEgress};
use crate::envelope;
use crate::sink::TurnUiSink;
use crate::state::GatewayState;

const SPEECH_QUEUE_CAPACITY: usize = 64;

pub async fn handle(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();

    let conn_id = state.connection_manager.register(
        ConnectionKind::Conversation,
        ["conversation".to_string()],
        Some(session_id.clone()),
        outbox_tx,
    );

    let stt = match state.stt_pool.acquire_for_session(&session_id).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(%session_id, %err, "stt pool exhausted, closing session");
            close_with_capacity_error(&mut ws_sender).await;
            state.connection_manager.unregister(&conn_id);
            return;
        }
    };
    let tts = match state.tts_pool.acquire_for_session(&session_id).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(%session_id, %err, "tts pool exhausted, closing session");
            close_with_capacity_error(&mut ws_sender).await;
            state.stt_pool.release_for_session(&session_id, true);
            state.connection_manager.unregister(&conn_id);
            return;
        }
    };

    let memory = match Memory::load(&session_id, &state.settings.session.system_prompt, state.kv.clone()).await {
        Ok(memory) => Arc::new(memory),
        Err(err) => {
            warn!(%session_id, %err, "failed to load session memory, starting fresh");
            Arc::new(Memory::new(&session_id, &state.settings.session.system_prompt, state.kv.clone()))
        }
    };
    state.sessions.add(&session_id, SessionEntry::new(memory.clone(), conn_id.clone()));

    let ctx = Arc::new(crate::context::SessionContext::new(
        session_id.clone(),
        memory.clone(),
        state.connection_manager.clone(),
        conn_id.clone(),
        state.stt_pool.clone(),
        state.tts_pool.clone(),
        stt,
        tts,
        state.voice.clone(),
        SampleRate::Hz24000,
    ));

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbox_rx.recv().await {
            if ws_sender.send(Message::Text(envelope.to_string())).await.is_err() {
                break;
            }
        }
    });

    run_greeting(&state, &ctx).await;

    let bridge = Arc::new(voice_agent_connection::ThreadBridge::new());
    bridge.set_scheduler(tokio::runtime::Handle::current());
    let speech_queue = Arc::new(voice_agent_connection::SpeechEventQueue::new(SPEECH_QUEUE_CAPACITY));

    wire_stt_callbacks(&ctx, &bridge, &speech_queue);

    let router = Arc::new(TurnRouter::new(memory.clone(), state.llm.clone(), state.tools.clone()));

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Binary(pcm))) => {
                        let _ = ctx.stt.engine.push_audio(&pcm);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(session_id = %session_id, %err, "websocket receive error");
                        break;
                    }
                }
            }
            event = speech_queue.dequeue() => {
                handle_speech_event(&state, &ctx, &router, event).await;
            }
        }
    }

    let _ = ctx.stt.engine.stop();
    let disconnect_grace = std::time::Duration::from_millis(state.settings.session.disconnect_grace_ms);
    ctx.tasks.cancel_all_with_grace(disconnect_grace).await;
    ctx.release_engines(true);
    let _ = memory.persist().await;
    state.connection_manager.unregister(&conn_id);
    state.sessions.remove(&session_id);
    writer.abort();
    info!(%session_id, "browser session closed");
}

async fn run_greeting(state: &GatewayState, ctx: &Arc<crate::context::SessionContext>) {
    let session_id = ctx.session_id.clone();
    ctx.connection_manager.broadcast_session(
        &session_id,
        envelope::status(&state.settings.session.greeting_text, "assistant", &session_id),
    );

    if ctx.memory.greeting_sent() {
        // Resume of an already-greeted session: replay the status envelope
        // above without re-synthesizing TTS.
        return;
    }

    ctx.memory.with_latency(|l| l.start("greeting_ttfb"));
    let egress = BrowserEgress {
        connection_manager: ctx.connection_manager.clone(),
        session_id: session_id.clone(),
        sample_rate_hz: ctx.sample_rate.as_hz(),
    };
    if let Err(err) = egress::synthesize_and_send(ctx, &state.settings.session.greeting_text, &egress).await {
        warn!(%session_id, %err, "greeting synthesis failed");
    }
    ctx.memory.append(LlmMessage::assistant(state.settings.session.greeting_text.clone()));
    ctx.memory.mark_greeting_sent();
    if let Err(err) = ctx.memory.persist().await {
        warn!(%session_id, %err, "failed to persist greeting state");
    }
}

fn wire_stt_callbacks(
    ctx: &Arc<crate::context::SessionContext>,
    bridge: &Arc<voice_agent_connection::ThreadBridge>,
    queue: &Arc<voice_agent_connection::SpeechEventQueue>,
) {
    let bridge = bridge.clone();
    let queue = queue.clone();
    let result = ctx.stt.engine.start(Arc::new(move |event| {
        bridge.queue_speech_result(&queue, event);
    }));
    if let Err(err) = result {
        warn!(session_id = %ctx.session_id, %err, "failed to start speech recognizer");
    }
}

async fn handle_speech_event(
    state: &GatewayState,
    ctx: &Arc<crate::context::SessionContext>,
    router: &Arc<TurnRouter>,
    event: voice_agent_core::transcript::SpeechEvent,
) {
    match event.kind {
        SpeechEventKind::Partial => {
            if ctx.is_speaking() {
                let grace = std::time::Duration::from_millis(state.settings.session.barge_in_grace_ms);
                barge_in::handle_barge_in(ctx, grace).await;
            }
            ctx.connection_manager.broadcast_session(
                &ctx.session_id,
                envelope::event("user", &event.text, "session", &ctx.session_id),
            );
        }
        SpeechEventKind::Final => {
            if event.text.trim().is_empty() {
                return;
            }
            spawn_turn(ctx, router, event.text);
        }
        SpeechEventKind::Cancel => {}
    }
}

fn spawn_turn(ctx: &Arc<crate::context::SessionContext>, router: &Arc<TurnRouter>, user_text: String) {
    let ctx = ctx.clone();
    let router = router.clone();
    let egress = Arc::new(BrowserEgress {
        connection_manager: ctx.connection_manager.clone(),
        session_id: ctx.session_id.clone(),
        sample_rate_hz: ctx.sample_rate.as_hz(),
    });
    let cancel = tokio_util::sync::CancellationToken::new();
    let cancel_task = cancel.clone();

    let handle = tokio::spawn(async move {
        let sink = TurnUiSink::new(ctx.clone(), egress);
        if let Err(err) = router.run_turn(&user_text, &sink, &cancel_task).await {
            warn!(session_id = %ctx.session_id, %err, "turn router failed");
        }
    });
    ctx.tasks.track(cancel, handle);
}

async fn close_with_capacity_error(sender: &mut (impl futures::Sink<Message> + Unpin)) {
    let frame = CloseFrame { code: 1013, reason: "capacity unavailable".into() };
    let _ = sender.send(Message::Close(Some(frame))).await;
}
