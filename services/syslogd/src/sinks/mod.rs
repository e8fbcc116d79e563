pub mod postgres_sink;
pub mod redis_sink;

pub use postgres_sink::PostgresSink;
pub use redis_sink::RedisSink;
