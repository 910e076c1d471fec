mod time;

pub use time::{format_local, local_rfc3339, now_local};
