//! Redis-backed `PredictionStore`.
//!
//! Uses a `ConnectionManager` so dropped connections are re-established
//! transparently. Multi-get is one pipeline round trip; atomic batches are a
//! `MULTI`/`EXEC` pipeline. Guarded batches run as one Lua script, because
//! `WATCH` cannot be scoped to a multiplexed connection.

use crate::error::StoreError;
use crate::store::{PredictionStore, StoreGuard, StoreOp, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Pipeline, Script};
use std::env;
use std::sync::Arc;

/// KEYS[1] is the guarded key, KEYS[i + 1] the key of op i.
/// ARGV[1] is "1" when a value is expected (ARGV[2]), "0" for absent; each op
/// then contributes three args: kind, a, b.
const GUARDED_BATCH_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
elseif current then
  return 0
end
for i = 2, #KEYS do
  local base = 3 + (i - 2) * 3
  local kind, a, b = ARGV[base], ARGV[base + 1], ARGV[base + 2]
  if kind == 'set' then
    if b == '' then
      redis.call('SET', KEYS[i], a)
    else
      redis.call('SET', KEYS[i], a, 'EX', b)
    end
  elseif kind == 'del' then
    redis.call('DEL', KEYS[i])
  elseif kind == 'sadd' then
    redis.call('SADD', KEYS[i], a)
  elseif kind == 'srem' then
    redis.call('SREM', KEYS[i], a)
  elseif kind == 'zadd' then
    redis.call('ZADD', KEYS[i], a, b)
  elseif kind == 'zrem' then
    redis.call('ZREM', KEYS[i], a)
  end
end
return 1
"#;

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    guarded_batch: Arc<Script>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!("Redis prediction store connected");
        Ok(Self {
            connection,
            guarded_batch: Arc::new(Script::new(GUARDED_BATCH_SCRIPT)),
        })
    }

    pub async fn from_env() -> StoreResult<Self> {
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::connect(&redis_url).await
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

/// Redis spells unbounded score ranges as "-inf"/"+inf"
fn score_bound(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

/// `(key, kind, a, b)` for one op of the guarded batch script
fn script_op(op: &StoreOp) -> (&str, &'static str, String, String) {
    match op {
        StoreOp::Set {
            key,
            value,
            ttl_secs,
        } => (
            key.as_str(),
            "set",
            value.clone(),
            ttl_secs.map(|t| t.to_string()).unwrap_or_default(),
        ),
        StoreOp::Delete { key } => (key.as_str(), "del", String::new(), String::new()),
        StoreOp::SetAdd { key, member } => (key.as_str(), "sadd", member.clone(), String::new()),
        StoreOp::SetRemove { key, member } => (key.as_str(), "srem", member.clone(), String::new()),
        StoreOp::SortedSetAdd { key, score, member } => {
            (key.as_str(), "zadd", score_bound(*score), member.clone())
        }
        StoreOp::SortedSetRemove { key, member } => {
            (key.as_str(), "zrem", member.clone(), String::new())
        }
    }
}

fn push_set(pipe: &mut Pipeline, key: &str, value: &str, ttl_secs: Option<u64>) {
    match ttl_secs {
        Some(ttl) => pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(ttl).ignore(),
        None => pipe.cmd("SET").arg(key).arg(value).ignore(),
    };
}

#[async_trait]
impl PredictionStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        push_set(&mut pipe, key, value, ttl_secs);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn sorted_set_add(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn
            .zrangebyscore(key, score_bound(min), score_bound(max))
            .await?)
    }

    async fn sorted_set_card(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(conn.zcard(key).await?)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_cardinality(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(conn.scard(key).await?)
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.smembers(key).await?)
    }

    async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        if values.len() != keys.len() {
            return Err(StoreError::Unavailable(format!(
                "pipelined get returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    async fn atomic(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                StoreOp::Set {
                    key,
                    value,
                    ttl_secs,
                } => push_set(&mut pipe, key, value, *ttl_secs),
                StoreOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
                StoreOp::SetAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
                StoreOp::SetRemove { key, member } => {
                    pipe.srem(key, member).ignore();
                }
                StoreOp::SortedSetAdd { key, score, member } => {
                    pipe.zadd(key, member, *score).ignore();
                }
                StoreOp::SortedSetRemove { key, member } => {
                    pipe.zrem(key, member).ignore();
                }
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        tracing::debug!("Committed atomic batch of {} ops", ops.len());
        Ok(())
    }

    async fn atomic_if(&self, guard: StoreGuard, ops: Vec<StoreOp>) -> StoreResult<bool> {
        let mut invocation = self.guarded_batch.prepare_invoke();
        invocation.key(&guard.key);
        match &guard.expected {
            Some(expected) => invocation.arg("1").arg(expected),
            None => invocation.arg("0").arg(""),
        };
        for op in &ops {
            let (key, kind, a, b) = script_op(op);
            invocation.key(key).arg(kind).arg(a).arg(b);
        }

        let mut conn = self.conn();
        let applied: i64 = invocation.invoke_async(&mut conn).await?;
        if applied == 1 {
            tracing::debug!("Committed guarded batch of {} ops on {}", ops.len(), guard.key);
        } else {
            tracing::debug!("Guarded batch on {} skipped, value changed", guard.key);
        }
        Ok(applied == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        assert_eq!(score_bound(f64::INFINITY), "+inf");
        assert_eq!(score_bound(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_bound(1700000000000.0), "1700000000000");
        assert_eq!(score_bound(1.5), "1.5");
    }

    #[test]
    fn test_script_op_encoding() {
        let set = StoreOp::Set {
            key: "prediction:m1".to_string(),
            value: "{}".to_string(),
            ttl_secs: Some(60),
        };
        assert_eq!(
            script_op(&set),
            ("prediction:m1", "set", "{}".to_string(), "60".to_string())
        );

        let persistent = StoreOp::Set {
            key: "model:calibration".to_string(),
            value: "{}".to_string(),
            ttl_secs: None,
        };
        assert_eq!(script_op(&persistent).3, "");

        let zadd = StoreOp::SortedSetAdd {
            key: "predictions:settled".to_string(),
            score: 1700000000000.0,
            member: "m1".to_string(),
        };
        assert_eq!(
            script_op(&zadd),
            ("predictions:settled", "zadd", "1700000000000".to_string(), "m1".to_string())
        );
    }
}
