use bytes::Bytes;

use crate::command::{TtlUnit, parse_expiry_arg};
use crate::error::ProxyResult;
use crate::resp::RespValue;
use crate::store::KvStore;
use crate::ttl::TtlNormalizer;

pub async fn cmd_del(args: &[Bytes], store: &dyn KvStore) -> ProxyResult<RespValue> {
    let removed = store.del(args).await?;
    Ok(RespValue::integer(removed as i64))
}

pub async fn cmd_exists(args: &[Bytes], store: &dyn KvStore) -> ProxyResult<RespValue> {
    let found = store.exists(args).await?;
    Ok(RespValue::integer(found as i64))
}

/// EXPIRE/TTL take seconds, PEXPIRE/PTTL take milliseconds. All four set a
/// new relative expiry on the backend document; the cache is not involved.
pub async fn cmd_expire(
    cmd: &str,
    args: &[Bytes],
    store: &dyn KvStore,
    ttl: &TtlNormalizer,
    unit: TtlUnit,
) -> ProxyResult<RespValue> {
    let amount = parse_expiry_arg(cmd, &args[1])?;
    let expiry = match unit {
        TtlUnit::Seconds => ttl.seconds(amount),
        TtlUnit::Millis => ttl.millis(amount),
    };
    let touched = store.expire(&args[0], expiry).await?;
    Ok(RespValue::integer(touched as i64))
}
