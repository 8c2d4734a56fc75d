use crate::commands::executable::Executable;
use crate::commands::expiry::Expiry;
use crate::commands::{CommandParser, CommandParserError, Context};
use crate::frame::Frame;
use crate::value::Value;
use crate::Error;

/// Set `key` to hold `value`, overwriting any previous value and discarding its time to live.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Value,
    pub expiry: Option<Expiry>,
}

impl Executable for Set {
    fn exec(self, ctx: &Context) -> Result<Frame, Error> {
        // Validate the deadline before touching the store so a bad option leaves the key as is.
        let deadline = self.expiry.map(|expiry| expiry.deadline()).transpose()?;

        ctx.store.set(self.key.clone(), self.value);

        if let Some(deadline) = deadline {
            ctx.store.expire_at(&self.key, deadline);
        }

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let value = Value::from_frame(parser.next_frame()?).map_err(|frame| {
            CommandParserError::InvalidFrame {
                expected: "string, integer or array value".to_string(),
                actual: frame,
            }
        })?;
        let expiry = Expiry::parse_optional(parser)?;
        parser.finish("SET")?;

        Ok(Self { key, value, expiry })
    }
}
