//! Media Lifecycle Handler (spec §4.8, telephony branch): owns the
//! telephony WebSocket, parses `AudioMetadata`/`AudioData` frames, and
//! gates pre-LLM routing on the DTMF validation lifecycle.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use voice_agent_connection::{ConnectionKind, SessionEntry};
use voice_agent_core::audio::SampleRate;
use voice_agent_core::traits::RecognizerWithPushStream;
use voice_agent_core::transcript::SpeechEventKind;
use voice_agent_turn::{DtmfLifecycle, Memory, TurnRouter};

use crate::barge_in;
use crate::egress::{self, TelephonyEgress};
use crate::envelope::{self, InboundMediaFrame};
use crate::sink::TurnUiSink;
use crate::state::GatewayState;

const SPEECH_QUEUE_CAPACITY: usize = 64;

pub async fn handle(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let call_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();

    let conn_id = state.connection_manager.register(
        ConnectionKind::Media,
        ["media".to_string()],
        Some(call_id.clone()),
        outbox_tx,
    );

    let stt = match state.stt_pool.acquire_for_session(&call_id).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(call_id = %call_id, %err, "stt pool exhausted, closing media session");
            close_with_capacity_error(&mut ws_sender).await;
            state.connection_manager.unregister(&conn_id);
            return;
        }
    };
    let tts = match state.tts_pool.acquire_for_session(&call_id).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(call_id = %call_id, %err, "tts pool exhausted, closing media session");
            close_with_capacity_error(&mut ws_sender).await;
            state.stt_pool.release_for_session(&call_id, true);
            state.connection_manager.unregister(&conn_id);
            return;
        }
    };

    let memory = match Memory::load(&call_id, &state.settings.session.system_prompt, state.kv.clone()).await {
        Ok(memory) => Arc::new(memory),
        Err(err) => {
            warn!(call_id = %call_id, %err, "failed to load call memory, starting fresh");
            Arc::new(Memory::new(&call_id, &state.settings.session.system_prompt, state.kv.clone()))
        }
    };
    state.sessions.add(&call_id, SessionEntry::new(memory.clone(), conn_id.clone()));

    let ctx = Arc::new(crate::context::SessionContext::new(
        call_id.clone(),
        memory.clone(),
        state.connection_manager.clone(),
        conn_id.clone(),
        state.stt_pool.clone(),
        state.tts_pool.clone(),
        stt,
        tts,
        state.voice.clone(),
        SampleRate::Hz16000,
    ));

    let dtmf = Arc::new(DtmfLifecycle::setup(&call_id, state.kv.clone()));

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbox_rx.recv().await {
            if ws_sender.send(Message::Text(envelope.to_string())).await.is_err() {
                break;
            }
        }
    });

    if !ctx.memory.greeting_sent() {
        ctx.memory.with_latency(|l| l.start("greeting_ttfb"));
        let egress = TelephonyEgress::new(ctx.connection_manager.clone(), call_id.clone());
        if let Err(err) = egress::synthesize_and_send(&ctx, &state.settings.session.greeting_text, &egress).await {
            warn!(call_id = %call_id, %err, "greeting synthesis failed");
        }
        ctx.memory.append(voice_agent_core::llm_types::Message::assistant(state.settings.session.greeting_text.clone()));
        ctx.memory.mark_greeting_sent();
        let _ = ctx.memory.persist().await;
    }

    let bridge = Arc::new(voice_agent_connection::ThreadBridge::new());
    bridge.set_scheduler(tokio::runtime::Handle::current());
    let speech_queue = Arc::new(voice_agent_connection::SpeechEventQueue::new(SPEECH_QUEUE_CAPACITY));
    let mut recognizer_started = false;

    let router = Arc::new(TurnRouter::new(memory.clone(), state.llm.clone(), state.tools.clone()));

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(raw))) => {
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else { continue };
                        match envelope::parse_inbound_media_frame(&value) {
                            InboundMediaFrame::AudioMetadata { validation_pending, .. } => {
                                if validation_pending {
                                    dtmf.begin_validation(state.settings.session.dtmf_expected_len);
                                }
                                if !recognizer_started {
                                    start_recognizer(&ctx, &bridge, &speech_queue);
                                    recognizer_started = true;
                                }
                            }
                            InboundMediaFrame::AudioData { pcm } => {
                                if recognizer_started {
                                    let _ = ctx.stt.engine.push_audio(&pcm);
                                }
                            }
                            InboundMediaFrame::DtmfTone { tone, sequence_id } => {
                                if let Err(err) = dtmf.on_tone(&tone, sequence_id).await {
                                    warn!(call_id = %call_id, %err, "dtmf tone handling failed");
                                }
                            }
                            InboundMediaFrame::Unknown => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(call_id = %call_id, %err, "websocket receive error");
                        break;
                    }
                }
            }
            event = speech_queue.dequeue() => {
                handle_speech_event(&state, &ctx, &router, &dtmf, event).await;
            }
        }
    }

    let _ = ctx.stt.engine.stop();
    let disconnect_grace = std::time::Duration::from_millis(state.settings.session.disconnect_grace_ms);
    ctx.tasks.cancel_all_with_grace(disconnect_grace).await;
    ctx.release_engines(true);
    let _ = memory.persist().await;
    state.connection_manager.unregister(&conn_id);
    state.sessions.remove(&call_id);
    writer.abort();
    info!(%call_id, "media session closed");
}

fn start_recognizer(
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
        warn!(session_id = %ctx.session_id, %err, "failed to start speech recognizer on first audio metadata frame");
    }
}

async fn handle_speech_event(
    state: &GatewayState,
    ctx: &Arc<crate::context::SessionContext>,
    router: &Arc<TurnRouter>,
    dtmf: &Arc<DtmfLifecycle>,
    event: voice_agent_core::transcript::SpeechEvent,
) {
    match event.kind {
        SpeechEventKind::Partial => {
            if ctx.is_speaking() {
                let grace = std::time::Duration::from_millis(state.settings.session.barge_in_grace_ms);
                barge_in::handle_barge_in(ctx, grace).await;
            }
        }
        SpeechEventKind::Final => {
            if event.text.trim().is_empty() {
                return;
            }
            if !dtmf.is_gate_open() {
                // Pre-LLM routing stays gated while a validation flow is
                // pending (spec §4.9). Wait off the main receive loop
                // (which still needs to process the tone frames the
                // validation is waiting on) for it to resolve within
                // `dtmf_wait_timeout_ms`; route the utterance through if
                // it completes in time, drop it otherwise.
                let dtmf = dtmf.clone();
                let ctx = ctx.clone();
                let router = router.clone();
                let user_text = event.text;
                let timeout_ms = state.settings.session.dtmf_wait_timeout_ms;
                tokio::spawn(async move {
                    match dtmf.wait_for_validation_completion(timeout_ms).await {
                        Ok(true) => spawn_turn(&ctx, &router, user_text),
                        Ok(false) => warn!(
                            session_id = %ctx.session_id,
                            "dtmf validation did not complete in time, dropping gated utterance"
                        ),
                        Err(err) => warn!(
                            session_id = %ctx.session_id, %err,
                            "dtmf validation wait failed, dropping gated utterance"
                        ),
                    }
                });
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
    let egress = Arc::new(TelephonyEgress::new(ctx.connection_manager.clone(), ctx.session_id.clone()));
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
