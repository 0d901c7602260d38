//! Command handlers and the dispatch table.
//!
//! Each handler reads/mutates session and conversation state, sends
//! exactly one response to the originating channel, and zero or more
//! events to other members' channels. Errors bubble up to `execute`,
//! which turns them into the error response.

use confab_protocol::{ClientFrame, CommandError, EventName, ServerMessage};

use crate::auth::TokenVerifier;
use crate::client::ClientSender;
use crate::registry::{Conversation, ConversationRegistry};
use crate::session::SessionState;

/// State shared by every connection: the conversation registry and
/// the token verifier.
pub struct SharedState {
    pub registry: ConversationRegistry,
    pub verifier: TokenVerifier,
}

impl SharedState {
    pub fn new(token_secret: &str) -> Self {
        Self {
            registry: ConversationRegistry::new(),
            verifier: TokenVerifier::new(token_secret),
        }
    }
}

/// Route a parsed frame to its handler and map failures to an error
/// response on the originating channel.
pub fn execute(
    shared: &SharedState,
    state: &mut SessionState,
    channel: &ClientSender,
    frame: &ClientFrame,
) {
    let result = match frame.command.as_str() {
        "join-conversation" => join_conversation(shared, state, channel, frame),
        "send-message" => send_message(state, channel, frame),
        "get-messages" => get_messages(state, channel, frame),
        "authenticate" => authenticate(shared, state, channel, frame),
        "remove-member" => remove_member(state, channel, frame),
        other => Err(CommandError::UnknownCommand(other.to_string())),
    };

    if let Err(err) = result {
        channel.send(&ServerMessage::error(Some(frame.req_id), &err));
    }
}

/// Remove `name` from the conversation and tell the remaining members.
/// No-op if the name is not currently a member. The guard is held
/// through the fan-out so the removal and its events land as one unit.
pub(crate) fn leave_conversation(conversation: &Conversation, name: &str) {
    let mut room = conversation.lock();
    if let Some(remaining) = room.remove_member(name) {
        for member in &remaining {
            member.send(&ServerMessage::event(EventName::MemberLeft, name));
        }
    }
}

fn join_conversation(
    shared: &SharedState,
    state: &mut SessionState,
    channel: &ClientSender,
    frame: &ClientFrame,
) -> Result<(), CommandError> {
    let args = frame.args.as_ref().ok_or(CommandError::MissingJoinArgs)?;
    let display_name = str_arg(args, "displayName")
        .ok_or(CommandError::MissingJoinArgs)?
        .to_string();
    let conversation_id = str_arg(args, "conversationId").ok_or(CommandError::MissingJoinArgs)?;

    // Re-joining moves the member: drop any prior membership first. A
    // failed join below leaves the session unjoined rather than
    // half-bound to the target conversation.
    if let (Some(prior), Some(name)) = (state.conversation.take(), state.display_name.take()) {
        leave_conversation(&prior, &name);
    }

    let conversation = shared.registry.get_or_create(conversation_id);
    {
        // Response and presence events go out while the lock is held,
        // so no other operation's effects can interleave with them.
        let mut room = conversation.lock();
        let existing = room.try_join(&display_name, channel.clone())?;

        channel.send(&ServerMessage::ok(frame.req_id));
        for member in &existing {
            member.send(&ServerMessage::event(EventName::MemberJoined, display_name.as_str()));
            channel.send(&ServerMessage::event(EventName::MemberJoined, display_name.as_str()));
        }
    }

    tracing::debug!(
        client_id = %channel.id(),
        conversation = conversation.id(),
        display_name = %display_name,
        "Member joined"
    );

    state.display_name = Some(display_name);
    state.conversation = Some(conversation);
    Ok(())
}

fn send_message(
    state: &mut SessionState,
    channel: &ClientSender,
    frame: &ClientFrame,
) -> Result<(), CommandError> {
    let text = frame
        .args
        .as_ref()
        .and_then(|args| str_arg(args, "text"))
        .ok_or(CommandError::MissingText)?;
    let conversation = state
        .conversation
        .as_ref()
        .ok_or(CommandError::SendBeforeJoin)?;
    let name = state.display_name.as_deref().unwrap_or_default();

    let encoded = urlencoding::encode(&format!("{name}: {text}")).into_owned();

    let mut room = conversation.lock();
    let members = room.append_message(encoded.clone());
    channel.send(&ServerMessage::ok(frame.req_id));
    for member in &members {
        member.send(&ServerMessage::event(EventName::NewMessage, encoded.as_str()));
    }
    Ok(())
}

fn get_messages(
    state: &mut SessionState,
    channel: &ClientSender,
    frame: &ClientFrame,
) -> Result<(), CommandError> {
    let conversation = state
        .conversation
        .as_ref()
        .ok_or(CommandError::GetBeforeJoin)?;
    let room = conversation.lock();
    channel.send(&ServerMessage::ok_with_body(
        frame.req_id,
        room.history_joined(),
    ));
    Ok(())
}

fn authenticate(
    shared: &SharedState,
    state: &mut SessionState,
    channel: &ClientSender,
    frame: &ClientFrame,
) -> Result<(), CommandError> {
    let token = frame
        .args
        .as_ref()
        .and_then(|args| str_arg(args, "token"))
        .ok_or(CommandError::MissingToken)?;

    state.is_admin = shared
        .verifier
        .verify_admin(token)
        .map_err(|e| CommandError::TokenRejected(e.to_string()))?;

    channel.send(&ServerMessage::ok(frame.req_id));
    Ok(())
}

fn remove_member(
    state: &mut SessionState,
    channel: &ClientSender,
    frame: &ClientFrame,
) -> Result<(), CommandError> {
    if !state.is_admin {
        return Err(CommandError::AdminRequired);
    }
    let name = frame
        .args
        .as_ref()
        .and_then(|args| str_arg(args, "name"))
        .ok_or(CommandError::MissingMemberName)?;

    // Invoking this before joining a conversation reports the member
    // as not found rather than faulting.
    let conversation = state
        .conversation
        .as_ref()
        .ok_or_else(|| CommandError::MemberNotFound(name.to_string()))?;

    let mut room = conversation.lock();
    let remaining = room
        .remove_member(name)
        .ok_or_else(|| CommandError::MemberNotFound(name.to_string()))?;

    for member in &remaining {
        member.send(&ServerMessage::event(EventName::MemberLeft, name));
    }
    channel.send(&ServerMessage::ok(frame.req_id));
    Ok(())
}

fn str_arg<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}
