//! Demo events served by the daemon.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use wsroom_server::{
    ConnectionHooks, Context, HandlerError, HandlerResult, HubError, Message, Registry, handler_fn,
};

#[derive(Debug, Deserialize)]
struct JoinRequest {
    room: String,
    #[serde(default)]
    channel: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    text: String,
}

/// Register every demo event on `registry`.
pub fn register_all(registry: &Registry) {
    let events = registry.events();
    events.register("ping", handler_fn(ping), false);
    events.register("room.join", handler_fn(room_join), false);
    events.register("room.leave", handler_fn(room_leave), false);
    events.register("room.message", handler_fn(room_message), true);
    events.register("session.whoami", handler_fn(whoami), false);
    debug!(events = ?events.events(), "demo events registered");
}

/// `ping` → `pong`, echoing the payload.
async fn ping(message: Message, ctx: Context) -> HandlerResult {
    let reply = Message {
        event_name: "pong".into(),
        data: message.data,
    };
    ctx.emit(&reply)?;
    Ok(())
}

/// `room.join {room, channel?}`: move into a room and announce it.
async fn room_join(message: Message, ctx: Context) -> HandlerResult {
    let request: JoinRequest = message.decode()?;
    if request.room.is_empty() {
        return Err(HandlerError::Failed("room name is empty".into()));
    }
    let registry = ctx.registry();
    announce_departure(&ctx);
    registry.join_room(ctx.id(), &request.room)?;
    if !request.channel.is_empty() {
        registry.join_room_channel(ctx.id(), &request.channel)?;
    }

    ctx.emit(&Message::with_data(
        "room.joined",
        &json!({ "room": request.room, "channel": request.channel }),
    )?)?;
    let presence = Message::with_data(
        "room.presence",
        &json!({ "connectionId": ctx.id(), "identity": ctx.identity(), "joined": true }),
    )?;
    let _ = registry.broadcast_to_room(&request.room, &presence, Some(ctx.id()));
    Ok(())
}

/// `room.leave`: leave the current room.
async fn room_leave(_message: Message, ctx: Context) -> HandlerResult {
    let room = ctx.connection().room();
    if !room.is_set() {
        return Err(HubError::NotInRoom(ctx.id().clone()).into());
    }
    announce_departure(&ctx);
    ctx.registry().leave_room(ctx.id())?;
    ctx.emit(&Message::with_data("room.left", &json!({ "room": room.name }))?)?;
    Ok(())
}

/// `room.message {text}`: relay to the sender's room and channel.
async fn room_message(message: Message, ctx: Context) -> HandlerResult {
    let request: ChatRequest = message.decode()?;
    let room = ctx.connection().room();
    if !room.is_set() {
        return Err(HubError::NotInRoom(ctx.id().clone()).into());
    }
    let out = Message::with_data(
        "room.message",
        &json!({ "from": ctx.identity(), "channel": room.channel, "text": request.text }),
    )?;
    let report =
        ctx.registry()
            .broadcast_to_room_channel(&room.name, &room.channel, &out, Some(ctx.id()));
    debug!(room = %room.name, delivered = report.delivered, "room message relayed");
    Ok(())
}

/// `session.whoami`: describe the calling connection.
async fn whoami(_message: Message, ctx: Context) -> HandlerResult {
    let room = ctx.connection().room();
    ctx.emit(&Message::with_data(
        "session.whoami",
        &json!({
            "connectionId": ctx.id(),
            "identity": ctx.identity(),
            "session": ctx.session(),
            "room": room.name,
            "channel": room.channel,
        }),
    )?)?;
    Ok(())
}

fn announce_departure(ctx: &Context) {
    let room = ctx.connection().room();
    if !room.is_set() {
        return;
    }
    let presence = Message::with_data(
        "room.presence",
        &json!({ "connectionId": ctx.id(), "identity": ctx.identity(), "joined": false }),
    );
    if let Ok(presence) = presence {
        let _ = ctx
            .registry()
            .broadcast_to_room(&room.name, &presence, Some(ctx.id()));
    }
}

/// Greets new connections and announces departures from rooms.
#[derive(Debug, Default)]
pub struct PresenceHooks;

impl ConnectionHooks for PresenceHooks {
    fn on_connect(&self, ctx: &Context) {
        if let Ok(greeting) = Message::with_data(
            "connection.established",
            &json!({ "connectionId": ctx.id(), "identity": ctx.identity() }),
        ) {
            let _ = ctx.emit(&greeting);
        }
    }

    fn on_close(&self, ctx: &Context) {
        announce_departure(ctx);
    }
}
