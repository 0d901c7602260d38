/// Client-visible command failures. Display output is the response
/// body sent over the wire, so the message text is part of the
/// protocol.
///
/// None of these are fatal to the connection: the session keeps
/// accepting frames after any of them.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid request format. Expecting JSON string.")]
    InvalidFormat,
    #[error("Invalid reqId. Expected: {expected}")]
    ReqIdMismatch { expected: u64 },
    #[error("join-conversation requires \"displayName\" and \"conversationId\" arguments in args")]
    MissingJoinArgs,
    #[error("Display name already taken")]
    NameTaken,
    #[error("send-message requires a \"text\" argument in args")]
    MissingText,
    #[error("Tried to send message before joining a conversation")]
    SendBeforeJoin,
    #[error("Tried to get messages before joining a conversation")]
    GetBeforeJoin,
    #[error("Expected \"token\" argument to contain a JWT String.")]
    MissingToken,
    #[error("{0}")]
    TokenRejected(String),
    #[error("remove-member command requires admin permissions")]
    AdminRequired,
    #[error("remove-member requires a \"name\" argument in args")]
    MissingMemberName,
    #[error("Member not found: {0}")]
    MemberNotFound(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl CommandError {
    /// HTTP-style status carried in the response envelope.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::TokenRejected(_) | Self::AdminRequired => 401,
            _ => 400,
        }
    }
}
