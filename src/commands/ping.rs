use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError, Context};
use crate::frame::Frame;
use crate::value::Value;
use crate::Error;

/// Returns PONG if no argument is provided, otherwise return a copy of the argument.
///
/// Ref: <https://redis.io/docs/latest/commands/ping>
#[derive(Debug, PartialEq)]
pub struct Ping {
    pub payload: Option<Value>,
}

impl Executable for Ping {
    fn exec(self, _ctx: &Context) -> Result<Frame, Error> {
        let res = self
            .payload
            .map_or(Frame::Simple("PONG".to_string()), Frame::from);

        Ok(res)
    }
}

impl TryFrom<&mut CommandParser> for Ping {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let payload = match parser.next_bytes() {
            Ok(payload) => Some(Value::String(payload)),
            Err(CommandParserError::EndOfStream) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self { payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{command, context};
    use crate::commands::Registry;

    #[tokio::test]
    async fn pong() {
        let ctx = context();
        let registry = Registry::with_builtins();

        assert_eq!(
            registry.dispatch(&ctx, command(&["PING"])),
            Some(Frame::Simple("PONG".to_string()))
        );
        assert_eq!(
            registry.dispatch(&ctx, command(&["ping", "hello"])),
            Some(Frame::Simple("hello".to_string()))
        );
    }
}
