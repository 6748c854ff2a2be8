mod commands;
mod parse;
mod status;

pub(crate) use commands::dispatch;
pub(crate) use parse::{parse_invocation, Command};
pub(crate) use status::status;
