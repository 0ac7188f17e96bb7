pub mod ids;
pub mod time;

pub use ids::{new_lock_token, new_operation_id};
pub use time::now_millis;
