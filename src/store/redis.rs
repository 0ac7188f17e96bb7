use super::{StateStore, StoreError};
use redis::{Client, Connection, Script};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed store. All commands go through one connection behind a
/// mutex; the callers already serialize writes per key, so contention here
/// is short-lived.
pub struct RedisStore {
    conn: Mutex<Connection>,
    release_script: Script,
}

impl RedisStore {
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|err| StoreError::Connect {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        let conn = client.get_connection().map_err(|err| StoreError::Connect {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn command_error(err: redis::RedisError) -> StoreError {
    StoreError::Command(err.to_string())
}

impl StateStore for RedisStore {
    fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.lock_conn();
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query::<()>(&mut conn)
            .map_err(command_error)
    }

    fn hash_put_all(
        &self,
        key: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in entries {
            cmd.arg(field).arg(value);
        }
        let mut conn = self.lock_conn();
        cmd.query::<()>(&mut conn).map_err(command_error)
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.lock_conn();
        redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query::<()>(&mut conn)
            .map_err(command_error)
    }

    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let mut conn = self.lock_conn();
        redis::cmd("HGETALL")
            .arg(key)
            .query::<BTreeMap<String, String>>(&mut conn)
            .map_err(command_error)
    }

    fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.lock_conn();
        redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query::<()>(&mut conn)
            .map_err(command_error)
    }

    fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.lock_conn();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query::<Vec<String>>(&mut conn)
            .map_err(command_error)
    }

    fn list_trim_to_last(&self, key: &str, max_len: usize) -> Result<(), StoreError> {
        let mut conn = self.lock_conn();
        redis::cmd("LTRIM")
            .arg(key)
            .arg(-(max_len as i64))
            .arg(-1)
            .query::<()>(&mut conn)
            .map_err(command_error)
    }

    fn list_rewrite(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("DEL").arg(key).ignore();
        if !values.is_empty() {
            let mut push = redis::cmd("RPUSH");
            push.arg(key);
            for value in values {
                push.arg(value);
            }
            pipe.add_command(push).ignore();
        }
        let mut conn = self.lock_conn();
        pipe.query::<()>(&mut conn).map_err(command_error)
    }

    fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.lock_conn();
        let reply = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query::<Option<String>>(&mut conn)
            .map_err(command_error)?;
        Ok(reply.is_some())
    }

    fn release_lock(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.lock_conn();
        let removed = self
            .release_script
            .key(key)
            .arg(token)
            .invoke::<i64>(&mut conn)
            .map_err(command_error)?;
        Ok(removed == 1)
    }
}
