//! `relay-scheduler` — time-deferred job execution with SQLite persistence.
//!
//! # Overview
//!
//! Pending jobs live in `scheduled_jobs`; every resolved job is moved to the
//! append-only `past_jobs` table in the same transaction that deletes it.
//! The [`engine::SchedulerEngine`] ticks on a fixed interval and, while the
//! outbound channel is ready, claims each due job and hands it to the send
//! gateway.
//!
//! # Job lifecycle
//!
//! | From          | Event                         | To                      |
//! |---------------|-------------------------------|-------------------------|
//! | `to_do`       | claimed by a tick             | `in_progress`           |
//! | `in_progress` | dispatch succeeded            | past job `delivered`    |
//! | `in_progress` | dispatch failed, policy gives up | past job `failed`    |
//! | `in_progress` | dispatch failed, retry allowed | `to_do` (later `scheduled_at`) |
//! | `in_progress` | lease expired                 | routed like a failure   |

pub mod claim;
pub mod db;
pub mod engine;
pub mod error;
pub mod policy;
pub mod recipient;
pub mod store;
pub mod types;

pub use claim::{claim, ClaimedJob};
pub use engine::{SchedulerEngine, SkipReason, TickOutcome, TickReport};
pub use error::{Result, SchedulerError};
pub use policy::{route_failure, Resolution};
pub use recipient::{normalize_phone, outbound_for, PhoneRules};
pub use store::{JobStore, SqliteJobStore};
pub use types::{JobStatus, JobType, NewJob, PastJob, PastJobStatus, ScheduledJob};
