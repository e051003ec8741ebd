use bytes::Bytes;

use crate::backend::Lookup;
use crate::command::parse_expiry_arg;
use crate::error::{ProxyError, ProxyResult};
use crate::resp::RespValue;
use crate::store::KvStore;
use crate::ttl::{Expiry, TtlNormalizer};

pub async fn cmd_get(args: &[Bytes], store: &dyn KvStore) -> ProxyResult<RespValue> {
    Ok(match store.get(&args[0]).await? {
        Some(value) => RespValue::bulk_string(value),
        None => RespValue::null_bulk_string(),
    })
}

/// SET key value [EX seconds | PX milliseconds]
pub async fn cmd_set(
    args: &[Bytes],
    store: &dyn KvStore,
    ttl: &TtlNormalizer,
) -> ProxyResult<RespValue> {
    let expiry = match args {
        [_, _] => Expiry::Never,
        [_, _, modifier, amount] => {
            if modifier.eq_ignore_ascii_case(b"EX") {
                ttl.seconds(parse_expiry_arg("SET", amount)?)
            } else if modifier.eq_ignore_ascii_case(b"PX") {
                ttl.millis(parse_expiry_arg("SET", amount)?)
            } else {
                return Err(ProxyError::UnknownModifier(
                    "set".into(),
                    String::from_utf8_lossy(modifier).into_owned(),
                ));
            }
        }
        _ => return Err(ProxyError::SyntaxError),
    };

    store.set(args[0].clone(), args[1].clone(), expiry).await?;
    Ok(RespValue::ok())
}

pub async fn cmd_mget(args: &[Bytes], store: &dyn KvStore) -> ProxyResult<RespValue> {
    let values = store.mget(args).await?;
    Ok(RespValue::array(
        values
            .into_iter()
            .map(|lookup| match lookup {
                Lookup::Found(value) => RespValue::bulk_string(value),
                Lookup::Absent | Lookup::Failed(_) => RespValue::null_bulk_string(),
            })
            .collect(),
    ))
}

pub async fn cmd_mset(args: &[Bytes], store: &dyn KvStore) -> ProxyResult<RespValue> {
    if args.len() % 2 != 0 {
        return Err(ProxyError::WrongArgCount("mset".into()));
    }
    let pairs = args
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    store.mset(pairs).await?;
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use crate::command::tests::{dispatcher, run};
    use crate::resp::RespValue;
    use crate::ttl::Expiry;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_del_scenario() {
        let (backend, d) = dispatcher();
        assert_eq!(
            run(&d, &["SET", "user:1", r#"{"name":"a"}"#, "EX", "60"]).await,
            RespValue::ok()
        );
        assert_eq!(
            backend.peek(b"user:1").await,
            Some((json!({"name": "a"}), Expiry::At(1_060)))
        );
        assert_eq!(
            run(&d, &["GET", "user:1"]).await,
            RespValue::bulk_string(r#"{"name":"a"}"#)
        );
        assert_eq!(run(&d, &["DEL", "user:1"]).await, RespValue::integer(1));
        assert_eq!(run(&d, &["GET", "user:1"]).await, RespValue::null_bulk_string());
    }

    #[tokio::test]
    async fn test_ex_and_px_agree() {
        let (backend, d) = dispatcher();
        run(&d, &["SET", "a", "1", "ex", "10"]).await;
        run(&d, &["SET", "b", "1", "px", "10000"]).await;
        run(&d, &["SET", "c", "1", "PX", "999"]).await;
        run(&d, &["SET", "z", "1", "EX", "0"]).await;
        assert_eq!(backend.peek(b"a").await.map(|d| d.1), Some(Expiry::At(1_010)));
        assert_eq!(backend.peek(b"b").await.map(|d| d.1), Some(Expiry::At(1_010)));
        assert_eq!(backend.peek(b"c").await.map(|d| d.1), Some(Expiry::Never));
        assert_eq!(backend.peek(b"z").await.map(|d| d.1), Some(Expiry::Never));
    }

    #[tokio::test]
    async fn test_set_rejects_bad_shapes_without_writing() {
        let (backend, d) = dispatcher();
        assert_eq!(
            run(&d, &["SET", "k", "1", "EX"]).await,
            RespValue::error("ERR syntax error")
        );
        assert_eq!(
            run(&d, &["SET", "k", "1", "EX", "5", "NX"]).await,
            RespValue::error("ERR syntax error")
        );
        assert_eq!(
            run(&d, &["SET", "k", "1", "KEEP", "5"]).await,
            RespValue::error("ERR unknown parameter for 'set': KEEP")
        );
        assert_eq!(
            run(&d, &["SET", "k", "1", "EX", "-5"]).await,
            RespValue::error("ERR invalid expire time in 'set' command")
        );
        assert_eq!(
            run(&d, &["SET", "k", "1", "PX", "soon"]).await,
            RespValue::error("ERR value is not an integer or out of range")
        );
        let reply = run(&d, &["SET", "k", "{broken"]).await;
        assert!(matches!(reply, RespValue::Error(ref e) if e.starts_with("ERR value for key 'k'")));
        assert_eq!(backend.stats().writes(), 0);
    }

    #[tokio::test]
    async fn test_mset_mget() {
        let (backend, d) = dispatcher();
        assert_eq!(run(&d, &["MSET", "a", "1", "c", r#""three""#]).await, RespValue::ok());
        assert_eq!(backend.peek(b"a").await, Some((json!(1), Expiry::Never)));

        assert_eq!(
            run(&d, &["MGET", "c", "b", "a"]).await,
            RespValue::array(vec![
                RespValue::bulk_string(r#""three""#),
                RespValue::null_bulk_string(),
                RespValue::bulk_string("1"),
            ])
        );
    }

    #[tokio::test]
    async fn test_mget_renders_failed_keys_as_null() {
        let (backend, d) = dispatcher();
        run(&d, &["MSET", "a", "1", "b", "2"]).await;
        backend.inject_fault("b").await;
        assert_eq!(
            run(&d, &["MGET", "a", "b"]).await,
            RespValue::array(vec![RespValue::bulk_string("1"), RespValue::null_bulk_string()])
        );
    }

    #[tokio::test]
    async fn test_mset_rejects_odd_pairs_without_writing() {
        let (backend, d) = dispatcher();
        assert_eq!(
            run(&d, &["MSET", "a", "1", "b"]).await,
            RespValue::error("ERR wrong number of arguments for 'mset' command")
        );
        let reply = run(&d, &["MSET", "a", "1", "b", "nope"]).await;
        assert!(matches!(reply, RespValue::Error(_)));
        assert_eq!(backend.stats().writes(), 0);
        assert_eq!(backend.peek(b"a").await, None);
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let (_, d) = dispatcher();
        run(&d, &["SET", "k", "[1,2]"]).await;
        run(&d, &["SET", "k", "[1,2]"]).await;
        assert_eq!(run(&d, &["GET", "k"]).await, RespValue::bulk_string("[1,2]"));
    }
}
