use crate::commands::Context;
use crate::frame::Frame;
use crate::Error;

pub trait Executable {
    fn exec(self, ctx: &Context) -> Result<Frame, Error>;
}
