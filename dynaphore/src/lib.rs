#![cfg_attr(feature = "strict", deny(warnings))]

//! A dynamically-sized counting semaphore for tokio.
//!
//! [`Dynaphore`] caps how many tasks may hold a permit at once, like an
//! ordinary counting semaphore, except that the maximum is itself adjustable
//! at runtime while acquire/release traffic is in flight. Raising the maximum
//! immediately unblocks waiting acquirers; lowering it never revokes permits
//! already held, it only stops new grants until enough releases bring the
//! count back under the new ceiling.
//!
//! All mutable state lives in a single arbiter task that services one request
//! at a time; every handle operation is a message to that task, so no locking
//! is involved anywhere.

mod arbiter;

pub mod dynaphore;
pub use dynaphore::{Dynaphore, LockChan, Permit};
