use tracing::info;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, Context};
use crate::frame::Frame;
use crate::Error;

/// Stops the listener from accepting new connections. Connections that are already open,
/// including the one that sent QUIT, keep being served.
#[derive(Debug, PartialEq)]
pub struct Quit;

impl Executable for Quit {
    fn exec(self, ctx: &Context) -> Result<Frame, Error> {
        info!("QUIT received, closing the listener");
        ctx.shutdown.cancel();

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Quit {
    type Error = Error;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
