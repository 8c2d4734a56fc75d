use crate::commands::executable::Executable;
use crate::commands::expiry::Expiry;
use crate::commands::{CommandParser, CommandParserError, Context};
use crate::frame::Frame;
use crate::Error;

/// Get the value of key and optionally set its expiration.
///
/// Ref: <https://redis.io/docs/latest/commands/getex/>
#[derive(Debug, PartialEq)]
pub struct Getex {
    pub key: String,

    pub ttl: Option<Ttl>,
}

#[derive(Debug, PartialEq)]
pub enum Ttl {
    Expire(Expiry),
    Persist, // Remove the expiration.
}

impl Executable for Getex {
    fn exec(self, ctx: &Context) -> Result<Frame, Error> {
        let value = match ctx.store.get(&self.key) {
            Some(value) => value,
            None => return Ok(Frame::NullBulkString),
        };

        match self.ttl {
            Some(Ttl::Expire(expiry)) => {
                ctx.store.expire_at(&self.key, expiry.deadline()?);
            }
            Some(Ttl::Persist) => {
                ctx.store.persist(&self.key);
            }
            None => {}
        }

        Ok(Frame::from(value))
    }
}

impl TryFrom<&mut CommandParser> for Getex {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;

        let option = match parser.next_string() {
            Ok(option) => option,
            Err(CommandParserError::EndOfStream) => return Ok(Self { key, ttl: None }),
            Err(err) => return Err(err.into()),
        };

        let ttl = if option.eq_ignore_ascii_case("PERSIST") {
            Ttl::Persist
        } else {
            Ttl::Expire(Expiry::parse(&option, parser)?)
        };
        parser.finish("GETEX")?;

        Ok(Self {
            key,
            ttl: Some(ttl),
        })
    }
}
