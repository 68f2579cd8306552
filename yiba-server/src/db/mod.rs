//! Per-entity database repositories

pub mod audit;
pub mod documents;
pub mod enrolments;
pub mod institutions;
pub mod learners;
pub mod notifications;
pub mod outbox;
pub mod qualifications;
pub mod readiness;
pub mod reviews;
pub mod sessions;
pub mod submissions;
pub mod users;
