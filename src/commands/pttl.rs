use crate::commands::executable::Executable;
use crate::commands::ttl::ttl_reply;
use crate::commands::{CommandParser, Context};
use crate::frame::Frame;
use crate::Error;

/// Like TTL this command returns the remaining time to live of a key that has an expire set, with
/// the sole difference that TTL returns the amount of remaining time in seconds while PTTL returns
/// it in milliseconds.
///
/// Ref: <https://redis.io/docs/latest/commands/pttl/>
#[derive(Debug, PartialEq)]
pub struct Pttl {
    pub key: String,
}

impl Executable for Pttl {
    fn exec(self, ctx: &Context) -> Result<Frame, Error> {
        Ok(ttl_reply(ctx, &self.key, |remaining| {
            ((remaining.as_micros() + 500) / 1000) as i64
        }))
    }
}

impl TryFrom<&mut CommandParser> for Pttl {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{command, context};
    use crate::commands::Registry;
    use tokio::time::{self, Duration};

    #[tokio::test]
    async fn pttl_in_milliseconds() {
        time::pause();
        let ctx = context();
        let registry = Registry::with_builtins();

        registry.dispatch(&ctx, command(&["SET", "k", "v", "PX", "500"]));
        assert_eq!(
            registry.dispatch(&ctx, command(&["PTTL", "k"])),
            Some(Frame::Integer(500))
        );

        time::advance(Duration::from_millis(120)).await;
        assert_eq!(
            registry.dispatch(&ctx, command(&["PTTL", "k"])),
            Some(Frame::Integer(380))
        );
    }

    #[tokio::test]
    async fn no_expiration() {
        let ctx = context();
        let registry = Registry::with_builtins();

        registry.dispatch(&ctx, command(&["SET", "k", "v"]));

        assert_eq!(
            registry.dispatch(&ctx, command(&["PTTL", "k"])),
            Some(Frame::Integer(-1))
        );
        assert_eq!(
            registry.dispatch(&ctx, command(&["PTTL", "missing"])),
            Some(Frame::NullBulkString)
        );
    }
}
