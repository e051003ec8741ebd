use bytes::Bytes;

use crate::connection::ClientState;
use crate::resp::RespValue;

pub fn cmd_ping(args: &[Bytes]) -> RespValue {
    match args.first() {
        Some(msg) => RespValue::bulk_string(msg.clone()),
        None => RespValue::simple_string("PONG"),
    }
}

pub fn cmd_quit(client: &mut ClientState) -> RespValue {
    client.should_close = true;
    RespValue::ok()
}
