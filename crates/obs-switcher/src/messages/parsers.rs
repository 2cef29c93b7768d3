mod event;
mod hello;
mod response;

pub(crate) use event::EventMessageParser;
pub(crate) use hello::HelloMessageParser;
pub(crate) use response::ResponseMessageParser;
