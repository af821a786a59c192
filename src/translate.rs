use crate::ctcp;
use crate::message::{Message, PRIVMSG};

/// Operator shorthand: `CTCP_<TAG> <target> :<text>` goes out as a CTCP
/// request in a `PRIVMSG`.
pub const CTCP_PREFIX: &str = "CTCP_";

/// Turns one line typed by the operator into the message to send. Lines the
/// parser cannot make anything of come back as `None` and are dropped.
pub fn translate(line: &str) -> Option<Message> {
    let mut message = Message::parse(line)?;

    if let Some(tag) = message.command.strip_prefix(CTCP_PREFIX) {
        let text = message.trailing.as_deref().unwrap_or_default();
        message.trailing = Some(ctcp::encode(tag, text));
        message.command = PRIVMSG.to_string();
    }

    Some(message)
}
