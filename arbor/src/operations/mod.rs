pub(crate) mod delete;
pub(crate) mod map_tree;
pub(crate) mod move_to;
pub(crate) mod rebuild;
pub(crate) mod save;

use std::time::{SystemTime, UNIX_EPOCH};

use storage::Value;

/// Wall-clock seconds for the timestamp columns.
pub(crate) fn timestamp_now() -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0);
    Value::Integer(seconds)
}
