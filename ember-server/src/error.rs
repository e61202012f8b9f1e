use ember_core::EmberError;
use thiserror::Error;

/// Result type for protocol and command handling.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by the line-protocol front-end. Command handlers return
/// these instead of panicking; the connection loop serializes them as
/// `-ERR <message>` replies.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("syntax err")]
    SyntaxIncorrect,

    #[error("wrong number of arguments for '{0}' command")]
    WrongNumArgs(&'static str),

    #[error(transparent)]
    Db(#[from] EmberError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
