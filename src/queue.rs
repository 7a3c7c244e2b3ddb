//! Queue store seams and implementations: the job list the workers pop
//! from, the result list they publish to, and the dedup key space.

pub mod memory;
pub mod redis;
pub mod store;

pub use memory::MemoryStore;
pub use redis::{RedisSettings, RedisStore};
pub use store::{
    dedup_cache_key, last_alert_key, Job, JobQueue, NullStore, ResultStore, JOBS_QUEUE,
    RESULTS_QUEUE,
};
