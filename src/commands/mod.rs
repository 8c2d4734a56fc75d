pub mod executable;
pub mod exists;
pub mod expiry;
pub mod get;
pub mod getex;
pub mod persist;
pub mod ping;
pub mod pttl;
pub mod quit;
pub mod set;
pub mod ttl;

use bytes::Bytes;
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::{str, vec};
use thiserror::Error as ThisError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::commands::executable::Executable;
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

use exists::Exists;
use get::Get;
use getex::Getex;
use persist::Persist;
use ping::Ping;
use pttl::Pttl;
use quit::Quit;
use set::Set;
use ttl::Ttl;

/// Everything a command handler may act on besides its own arguments.
#[derive(Clone)]
pub struct Context {
    pub store: Store,
    /// Cancelling this token stops the listener from accepting new connections.
    pub shutdown: CancellationToken,
}

/// A command implementation.
///
/// Handlers receive the arguments that followed the command name. `Ok(None)` sends no reply;
/// an error is sent back to the client as an error frame and the connection stays open.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: &Context, args: &mut CommandParser) -> Result<Option<Frame>, Error>;
}

impl<F> Handler for F
where
    F: Fn(&Context, &mut CommandParser) -> Result<Option<Frame>, Error> + Send + Sync + 'static,
{
    fn call(&self, ctx: &Context, args: &mut CommandParser) -> Result<Option<Frame>, Error> {
        self(ctx, args)
    }
}

// Adapts a command that parses itself from the arguments and always replies.
struct Builtin<C>(PhantomData<fn() -> C>);

impl<C> Builtin<C> {
    fn new() -> Self {
        Builtin(PhantomData)
    }
}

impl<C> Handler for Builtin<C>
where
    C: for<'a> TryFrom<&'a mut CommandParser, Error = Error> + Executable + 'static,
{
    fn call(&self, ctx: &Context, args: &mut CommandParser) -> Result<Option<Frame>, Error> {
        let cmd = C::try_from(args)?;
        cmd.exec(ctx).map(Some)
    }
}

/// Maps lower-cased command names to handlers.
///
/// The registry can be changed while connections are being served; a registration replaces any
/// handler previously registered under the same name and is seen by every command dispatched
/// afterwards. Clones share the same table.
#[derive(Clone, Default)]
pub struct Registry {
    handlers: Arc<DashMap<String, Arc<dyn Handler>>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// A registry holding the built-in command set.
    pub fn with_builtins() -> Registry {
        let registry = Registry::new();

        registry.register("exists", Builtin::<Exists>::new());
        registry.register("get", Builtin::<Get>::new());
        registry.register("getex", Builtin::<Getex>::new());
        registry.register("persist", Builtin::<Persist>::new());
        registry.register("ping", Builtin::<Ping>::new());
        registry.register("pttl", Builtin::<Pttl>::new());
        registry.register("quit", Builtin::<Quit>::new());
        registry.register("set", Builtin::<Set>::new());
        registry.register("ttl", Builtin::<Ttl>::new());

        registry
    }

    pub fn register<H: Handler>(&self, name: &str, handler: H) {
        self.handlers.insert(name.to_lowercase(), Arc::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(&name.to_lowercase())
            .map(|handler| handler.value().clone())
    }

    /// Runs the command carried by `frame` and returns the reply to send, if any.
    ///
    /// Unknown commands are dropped without a reply, and so are frames that are not arrays.
    pub fn dispatch(&self, ctx: &Context, frame: Frame) -> Option<Frame> {
        // Clients send commands to the server as RESP arrays.
        let frames = match frame {
            Frame::Array(frames) => frames,
            frame => {
                debug!("Ignoring non-array frame: {}", frame);
                return None;
            }
        };

        let parser = &mut CommandParser::new(frames);

        let command_name = match parser.parse_command_name() {
            Ok(name) => name,
            Err(err) => return Some(error_reply(err)),
        };

        // The handler is cloned out of the table so that no lock is held while it runs.
        let handler = match self.get(&command_name) {
            Some(handler) => handler,
            None => {
                warn!("Dropping unknown command {:?}", command_name);
                return None;
            }
        };

        match handler.call(ctx, parser) {
            Ok(reply) => reply,
            Err(err) => Some(error_reply(err)),
        }
    }
}

fn error_reply(err: impl std::fmt::Display) -> Frame {
    Frame::Error(format!("ERR {}", err))
}

/// Cursor over the arguments of a command.
pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    pub fn new(frames: Vec<Frame>) -> CommandParser {
        CommandParser {
            parts: frames.into_iter(),
        }
    }

    /// Number of arguments not consumed yet.
    pub fn remaining(&self) -> usize {
        self.parts.len()
    }

    fn parse_command_name(&mut self) -> Result<String, CommandParserError> {
        let command_name = self.parts.next().ok_or(CommandParserError::EmptyCommand)?;

        match command_name {
            Frame::Simple(s) => Ok(s.to_lowercase()),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_lowercase())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "command name".to_string(),
                actual: frame,
            }),
        }
    }

    pub fn next_frame(&mut self) -> Result<Frame, CommandParserError> {
        self.parts.next().ok_or(CommandParserError::EndOfStream)
    }

    pub fn next_string(&mut self) -> Result<String, CommandParserError> {
        let frame = self.next_frame()?;

        match frame {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            // While errors are stored as strings, they are considered separate types.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    pub fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        let frame = self.next_frame()?;

        match frame {
            Frame::Integer(i) => Ok(i),
            Frame::Simple(string) => {
                string
                    .parse::<i64>()
                    .map_err(|_| CommandParserError::InvalidFrame {
                        expected: "parseable i64 frame".to_string(),
                        actual: Frame::Simple(string),
                    })
            }
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map_err(CommandParserError::InvalidUTF8String)?
                .parse::<i64>()
                .map_err(|_| CommandParserError::InvalidFrame {
                    expected: "parseable i64 frame".to_string(),
                    actual: Frame::Bulk(bytes),
                }),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "integer".to_string(),
                actual: frame,
            }),
        }
    }

    pub fn next_bytes(&mut self) -> Result<Bytes, CommandParserError> {
        let frame = self.next_frame()?;

        match frame {
            Frame::Simple(s) => Ok(Bytes::from(s)),
            Frame::Bulk(bytes) => Ok(bytes),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    /// Fails when arguments are left over.
    pub fn finish(&mut self, command: &str) -> Result<(), CommandParserError> {
        match self.parts.next() {
            None => Ok(()),
            Some(frame) => Err(CommandParserError::InvalidCommandArgument {
                command: command.to_string(),
                argument: frame.to_string(),
            }),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("invalid command format")]
    EmptyCommand,
    #[error("invalid frame, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("invalid command argument {command} {argument}")]
    InvalidCommandArgument { command: String, argument: String },
    #[error("invalid expiration option, sent {0} expected one of EX, PX, EXAT, PXAT")]
    InvalidExpireOption(String),
    #[error("invalid numeric expiration")]
    InvalidExpireValue,
    #[error("invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("wrong number of arguments")]
    EndOfStream,
}
