use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError, Context};
use crate::frame::Frame;
use crate::Error;

/// Returns how many of the given keys exist. A key named several times is counted every time.
///
/// Ref: <https://redis.io/docs/latest/commands/exists/>
#[derive(Debug, PartialEq)]
pub struct Exists {
    pub keys: Vec<String>,
}

impl Executable for Exists {
    fn exec(self, ctx: &Context) -> Result<Frame, Error> {
        let count = self
            .keys
            .iter()
            .filter(|key| ctx.store.exists(key))
            .count();

        Ok(Frame::Integer(count as i64))
    }
}

impl TryFrom<&mut CommandParser> for Exists {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let mut keys = Vec::with_capacity(parser.remaining());

        loop {
            match parser.next_string() {
                Ok(key) => keys.push(key),
                Err(CommandParserError::EndOfStream) => break,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(Self { keys })
    }
}
