//! Deterministic client/certificate synthesis.
//!
//! This crate turns a `(seed, client range, certificate quota)` triple into a
//! reproducible sequence of certificate records. The client-id space is split
//! into disjoint shards so synthesizers can run in parallel without any
//! cross-thread coordination: each shard owns a private slice of the
//! certificate-id space and a private RNG stream.

pub mod errors;
pub mod shard;
pub mod synth;

pub use errors::SynthesisError;
pub use shard::{plan_shards, ShardSpec};
pub use synth::{
    max_feasible_records, CertificateSynthesizer, ISSUE_HORIZON_YEARS, MAX_ACTIVE_PER_CLIENT,
    MAX_VALIDITY_MONTHS, MIN_VALIDITY_MONTHS,
};
