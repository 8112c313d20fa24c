//! Feature-gated production implementations of the collaborator traits
//! in `crate::collaborators`. None of these are compiled by default --
//! the test suite and `src/fakes.rs` are sufficient to exercise every
//! invariant in this crate without a broker, bucket, or Redis instance.

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "s3")]
pub mod s3;

#[cfg(feature = "redis")]
pub mod redis_kv;
