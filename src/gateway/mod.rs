pub mod dispatcher;
pub mod events;
pub mod heartbeat;
pub mod registry;
pub mod resume;
pub mod router;
pub mod session;

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::db;
use crate::error::AppError;
use crate::models::event::{event_type, DomainEvent, Subject};
use crate::permissions::{query, Permissions};
use crate::presence;
use crate::snowflake;
use crate::state::AppState;

use events::{close_code, opcode, Frame};
use session::{Outbound, Session, SessionState};

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// The single writer for one socket. Everything the connection sends after
/// HELLO flows through here, so frame order on the wire is exactly queue
/// order.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Frame(text) => {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

enum AuthKind {
    Identify(crate::auth::AuthUser),
    Resume(Arc<Session>),
}

fn transition(conn_state: &mut SessionState, to: SessionState) {
    tracing::trace!(from = ?conn_state, ?to, "gateway connection state");
    *conn_state = to;
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();
    let mut conn_state = SessionState::Connecting;

    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let writer = tokio::spawn(write_loop(ws_sink, rx));

    if tx
        .send(Outbound::Frame(events::hello(
            state.gateway.heartbeat_interval,
        )))
        .is_err()
    {
        return;
    }
    transition(&mut conn_state, SessionState::HelloSent);

    // Wait for IDENTIFY or RESUME. A rejected RESUME keeps the socket open
    // and falls back to expecting IDENTIFY.
    let identify_deadline = tokio::time::sleep(state.gateway.identify_timeout);
    tokio::pin!(identify_deadline);

    let auth = loop {
        tokio::select! {
            _ = &mut identify_deadline => {
                let _ = tx.send(Outbound::Close {
                    code: close_code::NOT_AUTHENTICATED,
                    reason: "identify timeout",
                });
                return;
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<Frame>(&text) else {
                            let _ = tx.send(Outbound::Frame(events::error(
                                "decode_error",
                                "malformed frame",
                            )));
                            continue;
                        };
                        match frame.op {
                            opcode::IDENTIFY => {
                                transition(&mut conn_state, SessionState::Authenticating);
                                let identify = frame
                                    .data
                                    .and_then(|d| serde_json::from_value::<events::IdentifyData>(d).ok());
                                let Some(identify) = identify else {
                                    let _ = tx.send(Outbound::Frame(events::error(
                                        "decode_error",
                                        "malformed identify payload",
                                    )));
                                    continue;
                                };
                                match crate::auth::resolve_token(&state.db, &identify.token).await {
                                    Some(user) => break AuthKind::Identify(user),
                                    None => {
                                        let _ = tx.send(Outbound::Close {
                                            code: close_code::AUTH_FAILED,
                                            reason: "authentication failed",
                                        });
                                        return;
                                    }
                                }
                            }
                            opcode::RESUME => {
                                transition(&mut conn_state, SessionState::Authenticating);
                                let resume = frame
                                    .data
                                    .and_then(|d| serde_json::from_value::<events::ResumeData>(d).ok());
                                let Some(resume) = resume else {
                                    let _ = tx.send(Outbound::Frame(events::error(
                                        "decode_error",
                                        "malformed resume payload",
                                    )));
                                    continue;
                                };
                                match try_resume(&state, &resume, &tx) {
                                    Some(session) => break AuthKind::Resume(session),
                                    None => {
                                        // Invalid session: the client must
                                        // re-IDENTIFY and take a full snapshot.
                                        let _ = tx.send(Outbound::Frame(events::reconnect(false)));
                                        transition(&mut conn_state, SessionState::HelloSent);
                                        continue;
                                    }
                                }
                            }
                            opcode::HEARTBEAT => {
                                let _ = tx.send(Outbound::Frame(events::heartbeat_ack()));
                            }
                            _ => {
                                let _ = tx.send(Outbound::Frame(events::error(
                                    "not_authenticated",
                                    "identify first",
                                )));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    _ => {}
                }
            }
        }
    };

    let session = match auth {
        AuthKind::Identify(user) => {
            let session = Arc::new(Session::new(
                snowflake::generate(),
                user.user_id.clone(),
                state.gateway.resume_buffer_capacity,
                tx.clone(),
            ));

            let guild_ids = match state.dispatcher.register_subscriptions(&session).await {
                Ok(guild_ids) => guild_ids,
                Err(e) => {
                    tracing::error!("failed to register session: {e:?}");
                    let _ = tx.send(Outbound::Close {
                        code: close_code::UNKNOWN_ERROR,
                        reason: "internal error",
                    });
                    return;
                }
            };

            presence::set_presence(&state, &session.user_id, "online", vec![]);

            match build_ready(&state, &session, &guild_ids).await {
                Ok(snapshot) => {
                    // The snapshot must be the first sequenced dispatch, so
                    // it goes out before the presence broadcast below can
                    // loop back onto this session.
                    session.push_event(event_type::READY, &snapshot);
                }
                Err(e) => {
                    tracing::error!("failed to build ready snapshot: {e:?}");
                    state.registry.remove(&session.session_id);
                    state.router.remove_session(&session.session_id);
                    let _ = tx.send(Outbound::Close {
                        code: close_code::UNKNOWN_ERROR,
                        reason: "internal error",
                    });
                    return;
                }
            }
            broadcast_presence(&state, &session.user_id, "online", vec![], &guild_ids);
            session
        }
        AuthKind::Resume(session) => {
            // Replay already went through the writer; presence may have been
            // reaped to offline while detached.
            presence::set_presence(&state, &session.user_id, "online", vec![]);
            session
        }
    };
    transition(&mut conn_state, SessionState::Ready);

    let mut last_heartbeat = tokio::time::Instant::now();
    let mut heartbeat_interval = tokio::time::interval(state.gateway.heartbeat_interval);

    while conn_state == SessionState::Ready {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_heartbeat.elapsed() > state.gateway.heartbeat_timeout() {
                    // Treated like any disconnect: the session stays resumable
                    // for the grace window.
                    session.close_with(
                        close_code::SESSION_TIMED_OUT,
                        "heartbeat timeout",
                        state.gateway.resume_grace,
                    );
                    transition(&mut conn_state, SessionState::Closing);
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<Frame>(&text) else {
                            session.send_control(events::error("decode_error", "malformed frame"));
                            continue;
                        };
                        match frame.op {
                            opcode::HEARTBEAT => {
                                last_heartbeat = tokio::time::Instant::now();
                                session.send_control(events::heartbeat_ack());
                            }
                            opcode::PRESENCE_UPDATE => {
                                if let Err(e) = handle_presence_update(&state, &session, frame.data).await {
                                    session.send_control(events::error(e.code(), &e.message()));
                                }
                            }
                            opcode::TYPING => {
                                if let Err(e) = handle_typing(&state, &session, frame.data).await {
                                    session.send_control(events::error(e.code(), &e.message()));
                                }
                            }
                            opcode::SUBSCRIBE => {
                                if let Err(e) = handle_subscribe(&state, &session, frame.data).await {
                                    session.send_control(events::error(e.code(), &e.message()));
                                }
                            }
                            opcode::REQUEST_MEMBERS => {
                                if let Err(e) = handle_request_members(&state, &session, frame.data).await {
                                    session.send_control(events::error(e.code(), &e.message()));
                                }
                            }
                            opcode::VOICE_STATE_UPDATE => {
                                if let Err(e) = handle_voice_state_update(&state, &session, frame.data).await {
                                    session.send_control(events::error(e.code(), &e.message()));
                                }
                            }
                            opcode::IDENTIFY | opcode::RESUME => {
                                session.close_with(
                                    close_code::ALREADY_AUTHENTICATED,
                                    "already authenticated",
                                    state.gateway.resume_grace,
                                );
                                transition(&mut conn_state, SessionState::Closing);
                            }
                            _ => {
                                session.send_control(events::error("unknown_opcode", "unknown opcode"));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        transition(&mut conn_state, SessionState::Closing);
                    }
                    Some(Err(_)) => {
                        transition(&mut conn_state, SessionState::Closing);
                    }
                    _ => {}
                }
            }
        }
    }

    // The transport is gone but the session lives on: subscriptions and the
    // resume buffer are only torn down when the reaper sweeps the expired
    // grace window. Skip the detach if a newer socket already resumed it.
    session.detach_transport(&tx, state.gateway.resume_grace);
    drop(tx);
    let _ = writer.await;

    if !state
        .registry
        .user_has_other_sessions(&session.user_id, &session.session_id)
    {
        presence::remove_presence(&state, &session.user_id);
        let guild_ids = db::guilds::list_guild_ids_for_user(&state.db, &session.user_id)
            .await
            .unwrap_or_default();
        broadcast_presence(&state, &session.user_id, "offline", vec![], &guild_ids);
    }
}

/// Look up and rebind a resumable session; replay goes through `tx` before
/// the session rejoins live dispatch.
fn try_resume(
    state: &AppState,
    resume: &events::ResumeData,
    tx: &mpsc::UnboundedSender<Outbound>,
) -> Option<Arc<Session>> {
    let session = state.registry.get(&resume.session_id)?;
    match session.resume(resume.seq, tx.clone()) {
        Ok(replayed) => {
            tracing::debug!(
                session_id = %session.session_id,
                replayed,
                "session resumed"
            );
            Some(session)
        }
        Err(_) => None,
    }
}

async fn build_ready(
    state: &AppState,
    session: &Arc<Session>,
    guild_ids: &[String],
) -> Result<Value, AppError> {
    let user = db::users::get_user(&state.db, &session.user_id).await?;

    let mut guilds = Vec::new();
    let mut member_ids = BTreeSet::new();
    for guild_id in guild_ids {
        let guild = db::guilds::get_guild_row(&state.db, guild_id).await?;
        let channels = query::visible_channel_ids(
            &state.db,
            &state.perm_cache,
            &session.user_id,
            guild_id,
        )
        .await?;
        member_ids.extend(db::members::list_member_user_ids(&state.db, guild_id).await?);
        guilds.push(json!({
            "id": guild.id,
            "name": guild.name,
            "owner_id": guild.owner_id,
            "channels": channels,
        }));
    }

    let member_ids: Vec<String> = member_ids.into_iter().collect();
    let presences: Vec<Value> = presence::presences_for(state, &member_ids)
        .into_iter()
        .map(|p| {
            json!({
                "user_id": p.user_id,
                "status": presence::wire_status(&p.status),
                "client_status": p.client_status,
                "activities": p.activities,
            })
        })
        .collect();

    Ok(json!({
        "session_id": session.session_id,
        "user": user,
        "guilds": guilds,
        "presences": presences,
        "server_version": env!("CARGO_PKG_VERSION"),
    }))
}

fn broadcast_presence(
    state: &AppState,
    user_id: &str,
    status: &str,
    activities: Vec<Value>,
    guild_ids: &[String],
) {
    let status = presence::wire_status(status);
    let payload = json!({
        "user_id": user_id,
        "status": status,
        "client_status": { "desktop": status },
        "activities": activities,
    });
    for guild_id in guild_ids {
        state.publish(
            DomainEvent::guild(event_type::PRESENCE_UPDATE, guild_id, payload.clone())
                .with_user(user_id),
        );
    }
}

async fn handle_presence_update(
    state: &AppState,
    session: &Arc<Session>,
    data: Option<Value>,
) -> Result<(), AppError> {
    let update: events::PresenceUpdateData = decode(data)?;
    let status = if presence::VALID_STATUSES.contains(&update.status.as_str()) {
        update.status.as_str()
    } else {
        "online"
    };
    let activities = update.activity.map(|a| vec![a]).unwrap_or_default();

    presence::set_presence(state, &session.user_id, status, activities.clone());
    let guild_ids = db::guilds::list_guild_ids_for_user(&state.db, &session.user_id).await?;
    broadcast_presence(state, &session.user_id, status, activities, &guild_ids);
    Ok(())
}

async fn handle_typing(
    state: &AppState,
    session: &Arc<Session>,
    data: Option<Value>,
) -> Result<(), AppError> {
    let typing: events::TypingData = decode(data)?;
    query::require_channel_permission(
        &state.db,
        &state.perm_cache,
        &session.user_id,
        &typing.channel_id,
        Permissions::SEND_MESSAGES,
    )
    .await?;

    let channel = db::channels::get_channel_row(&state.db, &typing.channel_id).await?;
    state.publish(
        DomainEvent::channel(
            event_type::TYPING_START,
            &channel.guild_id,
            &channel.id,
            json!({
                "channel_id": channel.id,
                "user_id": session.user_id,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        )
        .with_user(&session.user_id),
    );
    Ok(())
}

async fn handle_subscribe(
    state: &AppState,
    session: &Arc<Session>,
    data: Option<Value>,
) -> Result<(), AppError> {
    let subscribe: events::SubscribeData = decode(data)?;
    query::require_channel_permission(
        &state.db,
        &state.perm_cache,
        &session.user_id,
        &subscribe.channel_id,
        Permissions::VIEW_CHANNEL,
    )
    .await?;

    state
        .router
        .subscribe(&session.session_id, Subject::Channel(subscribe.channel_id));
    Ok(())
}

async fn handle_request_members(
    state: &AppState,
    session: &Arc<Session>,
    data: Option<Value>,
) -> Result<(), AppError> {
    let request: events::RequestMembersData = decode(data)?;
    query::require_membership(&state.db, &request.guild_id, &session.user_id).await?;

    let members = db::members::list_members(&state.db, &request.guild_id).await?;
    let user_ids: Vec<String> = members.iter().map(|m| m.user_id.clone()).collect();
    let users = db::users::get_users(&state.db, &user_ids).await?;

    let chunk: Vec<Value> = members
        .iter()
        .map(|member| {
            let username = users
                .iter()
                .find(|u| u.id == member.user_id)
                .map(|u| u.username.clone());
            json!({
                "user_id": member.user_id,
                "username": username,
                "nickname": member.nickname,
                "joined_at": member.joined_at,
                "timeout_until": member.timeout_until,
            })
        })
        .collect();

    // Addressed to the requesting session only, but still sequenced like any
    // other dispatch.
    session.push_event(
        event_type::MEMBER_CHUNK,
        &json!({
            "guild_id": request.guild_id,
            "members": chunk,
        }),
    );
    Ok(())
}

/// Voice state is pure signaling here; media negotiation lives elsewhere.
async fn handle_voice_state_update(
    state: &AppState,
    session: &Arc<Session>,
    data: Option<Value>,
) -> Result<(), AppError> {
    let update: events::VoiceStateUpdateData = decode(data)?;

    if let Some(channel_id) = &update.channel_id {
        let channel = db::channels::get_channel_row(&state.db, channel_id).await?;
        if channel.kind != "voice" {
            return Err(AppError::BadRequest("not a voice channel".to_string()));
        }
        query::require_channel_permission(
            &state.db,
            &state.perm_cache,
            &session.user_id,
            channel_id,
            Permissions::CONNECT,
        )
        .await?;
    }

    state.publish(
        DomainEvent::guild(
            event_type::VOICE_STATE_UPDATE,
            &update.guild_id,
            json!({
                "user_id": session.user_id,
                "guild_id": update.guild_id,
                "channel_id": update.channel_id,
                "self_mute": update.self_mute.unwrap_or(false),
                "self_deaf": update.self_deaf.unwrap_or(false),
            }),
        )
        .with_user(&session.user_id),
    );
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(data: Option<Value>) -> Result<T, AppError> {
    data.and_then(|d| serde_json::from_value(d).ok())
        .ok_or_else(|| AppError::BadRequest("malformed payload".to_string()))
}
