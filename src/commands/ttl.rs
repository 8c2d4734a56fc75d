use tokio::time::Duration;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, Context};
use crate::frame::Frame;
use crate::store;
use crate::Error;

/// TTL returns the remaining time to live of a key that has a timeout. This introspection
/// capability allows a client to check how many seconds a given key will continue to be part of
/// the dataset.
///
/// Ref: <https://redis.io/docs/latest/commands/ttl>
#[derive(Debug, PartialEq)]
pub struct Ttl {
    pub key: String,
}

impl Executable for Ttl {
    fn exec(self, ctx: &Context) -> Result<Frame, Error> {
        Ok(ttl_reply(ctx, &self.key, |remaining| {
            (remaining + Duration::from_millis(500)).as_secs() as i64
        }))
    }
}

impl TryFrom<&mut CommandParser> for Ttl {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        Ok(Self { key })
    }
}

/// Shared by TTL and PTTL: null for a missing key, -1 for a key without a pending expiration,
/// otherwise the remaining time converted by `unit`.
pub(crate) fn ttl_reply(ctx: &Context, key: &str, unit: impl Fn(Duration) -> i64) -> Frame {
    match ctx.store.ttl(key) {
        None => Frame::NullBulkString,
        Some(store::Ttl::NoExpiry) => Frame::Integer(-1),
        Some(store::Ttl::Remaining(remaining)) => Frame::Integer(unit(remaining)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{command, context};
    use crate::commands::Registry;
    use tokio::time;

    #[tokio::test]
    async fn ttl_in_seconds() {
        time::pause();
        let ctx = context();
        let registry = Registry::with_builtins();

        registry.dispatch(&ctx, command(&["SET", "k", "v"]));
        assert_eq!(
            registry.dispatch(&ctx, command(&["TTL", "k"])),
            Some(Frame::Integer(-1))
        );

        registry.dispatch(&ctx, command(&["GETEX", "k", "EX", "10"]));
        assert_eq!(
            registry.dispatch(&ctx, command(&["TTL", "k"])),
            Some(Frame::Integer(10))
        );

        time::advance(Duration::from_millis(1400)).await;
        assert_eq!(
            registry.dispatch(&ctx, command(&["TTL", "k"])),
            Some(Frame::Integer(9))
        );
    }

    #[tokio::test]
    async fn missing_key() {
        let ctx = context();

        let res = Ttl {
            key: "nope".to_string(),
        }
        .exec(&ctx)
        .unwrap();

        assert_eq!(res, Frame::NullBulkString);
    }

    #[tokio::test]
    async fn persisted_key() {
        let ctx = context();
        let registry = Registry::with_builtins();

        registry.dispatch(&ctx, command(&["SET", "k", "v", "EX", "100"]));
        registry.dispatch(&ctx, command(&["PERSIST", "k"]));

        assert_eq!(
            registry.dispatch(&ctx, command(&["TTL", "k"])),
            Some(Frame::Integer(-1))
        );
    }
}
