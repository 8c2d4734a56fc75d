use crate::commands::executable::Executable;
use crate::commands::{CommandParser, Context};
use crate::frame::Frame;
use crate::Error;

/// Exempt `key` from the expiration scheduled for it. Replies 1 when the key was marked, 0 when
/// it does not exist or was already marked.
///
/// Ref: <https://redis.io/docs/latest/commands/persist/>
#[derive(Debug, PartialEq)]
pub struct Persist {
    pub key: String,
}

impl Executable for Persist {
    fn exec(self, ctx: &Context) -> Result<Frame, Error> {
        let persisted = ctx.store.persist(&self.key);
        Ok(Frame::Integer(i64::from(persisted)))
    }
}

impl TryFrom<&mut CommandParser> for Persist {
    type Error = Error;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::context;
    use crate::value::Value;

    #[tokio::test]
    async fn persist_once() {
        let ctx = context();
        ctx.store.set("k".to_string(), Value::from("v"));

        let persist = || Persist {
            key: "k".to_string(),
        };

        assert_eq!(persist().exec(&ctx).unwrap(), Frame::Integer(1));
        assert_eq!(persist().exec(&ctx).unwrap(), Frame::Integer(0));
    }

    #[tokio::test]
    async fn missing_key() {
        let ctx = context();

        let res = Persist {
            key: "k".to_string(),
        }
        .exec(&ctx)
        .unwrap();

        assert_eq!(res, Frame::Integer(0));
    }
}
