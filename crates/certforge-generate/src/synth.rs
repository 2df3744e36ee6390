use chrono::{Datelike, Days, Duration, Months, NaiveDateTime};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use certforge_core::CertificateRecord;

use crate::errors::SynthesisError;
use crate::shard::ShardSpec;

/// Ceiling on simultaneously held (non-expired) certificates per client.
pub const MAX_ACTIVE_PER_CLIENT: u64 = 20;
/// Minimum validity window, in calendar months.
pub const MIN_VALIDITY_MONTHS: u32 = 3;
/// Maximum validity window, in calendar months (20 years).
pub const MAX_VALIDITY_MONTHS: u32 = 240;
/// How far before the reference time an `issued_at` may fall, in years.
pub const ISSUE_HORIZON_YEARS: u32 = 25;
/// Ceiling on reissued-window length, in months. Reassigned numbers get
/// short windows so one freed slot can host many successive owners.
const REUSE_WINDOW_CAP_MONTHS: u32 = 12;

/// Most records a dataset of `num_clients` clients can hold: every client at
/// the active cap, every id slot cycled through the maximum number of
/// disjoint minimum-length windows that fit the issuance horizon.
pub fn max_feasible_records(num_clients: u64) -> u64 {
    let windows_per_slot = (ISSUE_HORIZON_YEARS * 12 / MIN_VALIDITY_MONTHS) as u64;
    num_clients
        .saturating_mul(MAX_ACTIVE_PER_CLIENT)
        .saturating_mul(windows_per_slot)
}

/// Deterministic per-shard certificate synthesis.
///
/// Identical `(seed, reference_time, shard)` inputs produce identical record
/// sequences, so shards run in parallel without coordination and whole runs
/// are reproducible.
#[derive(Debug, Clone, Copy)]
pub struct CertificateSynthesizer {
    seed: u64,
    reference_time: NaiveDateTime,
}

/// An occupied certificate-number slot and its most recent window.
struct IdSlot {
    certificate_id: i64,
    expires_at: NaiveDateTime,
    client_id: i64,
}

impl CertificateSynthesizer {
    pub fn new(seed: u64, reference_time: NaiveDateTime) -> Self {
        Self {
            seed,
            reference_time,
        }
    }

    pub fn reference_time(&self) -> NaiveDateTime {
        self.reference_time
    }

    /// Generate the shard's full record sequence into a vector.
    pub fn generate_shard(
        &self,
        spec: &ShardSpec,
    ) -> Result<Vec<CertificateRecord>, SynthesisError> {
        let mut records = Vec::with_capacity(spec.cert_quota as usize);
        self.generate_shard_with(spec, |record| {
            records.push(record);
            true
        })?;
        Ok(records)
    }

    /// Generate the shard's records, handing each to `emit` as soon as it is
    /// produced. Primary records come first; once the shard's per-client
    /// capacity is exhausted, the remaining quota is met by reassigning ids
    /// whose windows have fully elapsed.
    ///
    /// `emit` returning `false` stops generation early (used for cooperative
    /// cancellation); the count of emitted records is returned either way.
    pub fn generate_shard_with<F>(
        &self,
        spec: &ShardSpec,
        mut emit: F,
    ) -> Result<u64, SynthesisError>
    where
        F: FnMut(CertificateRecord) -> bool,
    {
        let mut rng = ChaCha8Rng::seed_from_u64(shard_seed(self.seed, spec.index));
        let target = spec.primary_capacity();
        let counts = draw_client_counts(&mut rng, spec.client_count, target);

        let mut emitted = 0u64;
        let mut slots: Vec<IdSlot> = Vec::with_capacity(target as usize);
        let mut next_id = spec.id_base;

        for (offset, count) in counts.iter().enumerate() {
            let client_id = spec.client_start + offset as i64;
            for _ in 0..*count {
                let record = self.primary_record(&mut rng, next_id, client_id);
                next_id += 1;
                slots.push(IdSlot {
                    certificate_id: record.certificate_id,
                    expires_at: record.expires_at,
                    client_id,
                });
                if !emit(record) {
                    return Ok(emitted);
                }
                emitted += 1;
            }
        }

        let mut remaining = spec.cert_quota - target;
        if remaining > 0 {
            debug!(
                shard = spec.index,
                remaining, "primary id range exhausted, reusing expired certificate ids"
            );
        }

        let mut cursor = 0usize;
        let mut scanned_without_hit = 0usize;
        while remaining > 0 {
            if slots.is_empty() || scanned_without_hit >= slots.len() {
                return Err(SynthesisError::ConstraintViolation(format!(
                    "shard {} still owes {} of {} records but no certificate id has been expired \
                     for at least {} months before the reference time; \
                     lower the certificate-to-client ratio",
                    spec.index, remaining, spec.cert_quota, MIN_VALIDITY_MONTHS
                )));
            }
            let slot_index = cursor % slots.len();
            cursor += 1;
            match self.reuse_record(&mut rng, &slots[slot_index], spec) {
                Some(record) => {
                    scanned_without_hit = 0;
                    slots[slot_index].expires_at = record.expires_at;
                    slots[slot_index].client_id = record.client_id;
                    if !emit(record) {
                        return Ok(emitted);
                    }
                    emitted += 1;
                    remaining -= 1;
                }
                None => scanned_without_hit += 1,
            }
        }

        Ok(emitted)
    }

    fn primary_record(
        &self,
        rng: &mut ChaCha8Rng,
        certificate_id: i64,
        client_id: i64,
    ) -> CertificateRecord {
        let horizon_start = self
            .reference_time
            .checked_sub_months(Months::new(ISSUE_HORIZON_YEARS * 12))
            .unwrap_or(self.reference_time);
        let issued_at = sample_between(rng, horizon_start, self.reference_time);
        let months = rng.random_range(MIN_VALIDITY_MONTHS..MAX_VALIDITY_MONTHS);
        // up to 28 extra days never pushes a 239-month window past 20 years
        let days = rng.random_range(0..=28u64);
        CertificateRecord {
            certificate_id,
            client_id,
            issued_at,
            expires_at: add_window(issued_at, months, days),
        }
    }

    /// Reassign an expired id slot to a new owner with a fresh window that
    /// fits entirely between the old expiry and the reference time. Returns
    /// `None` while the slot is not yet eligible.
    fn reuse_record(
        &self,
        rng: &mut ChaCha8Rng,
        slot: &IdSlot,
        spec: &ShardSpec,
    ) -> Option<CertificateRecord> {
        let available = whole_months_between(slot.expires_at, self.reference_time);
        if available < MIN_VALIDITY_MONTHS {
            return None;
        }
        let months =
            rng.random_range(MIN_VALIDITY_MONTHS..=available.min(REUSE_WINDOW_CAP_MONTHS));
        let issue_latest = self
            .reference_time
            .checked_sub_months(Months::new(months))?;
        let issued_at = sample_between(rng, slot.expires_at, issue_latest);
        let expires_at = issued_at.checked_add_months(Months::new(months))?;
        Some(CertificateRecord {
            certificate_id: slot.certificate_id,
            client_id: pick_new_owner(rng, spec, slot.client_id),
            issued_at,
            expires_at,
        })
    }
}

/// Draw per-client record counts in `[0, 20]` whose sum is exactly `target`.
/// Counts are drawn uniformly, scaled onto the target, and the tail clients
/// absorb the rounding, so attribution stays spread over the whole range no
/// matter the certificate-to-client ratio.
fn draw_client_counts(rng: &mut ChaCha8Rng, client_count: u64, target: u64) -> Vec<u8> {
    let mut counts = vec![0u8; client_count as usize];
    if target == 0 {
        return counts;
    }

    let mut draws = vec![0u8; counts.len()];
    let mut drawn_total = 0u64;
    for draw in draws.iter_mut() {
        let value = rng.random_range(0..=MAX_ACTIVE_PER_CLIENT);
        *draw = value as u8;
        drawn_total += value;
    }

    let mut assigned = 0u64;
    if drawn_total > 0 {
        for (count, draw) in counts.iter_mut().zip(&draws) {
            let scaled = (*draw as u64 * target / drawn_total).min(MAX_ACTIVE_PER_CLIENT);
            *count = scaled as u8;
            assigned += scaled;
        }
    }

    let mut deficit = target - assigned;
    while deficit > 0 {
        let mut progressed = false;
        for count in counts.iter_mut().rev() {
            if deficit == 0 {
                break;
            }
            if (*count as u64) < MAX_ACTIVE_PER_CLIENT {
                *count += 1;
                deficit -= 1;
                progressed = true;
            }
        }
        // callers never ask for more than 20 records per client
        debug_assert!(progressed);
        if !progressed {
            break;
        }
    }
    counts
}

/// A reused number always changes hands when the shard has more than one
/// client to give it to.
fn pick_new_owner(rng: &mut ChaCha8Rng, spec: &ShardSpec, previous: i64) -> i64 {
    if spec.client_count <= 1 {
        return spec.client_start;
    }
    let prev_offset = (previous - spec.client_start) as u64;
    let offset =
        (prev_offset + 1 + rng.random_range(0..spec.client_count - 1)) % spec.client_count;
    spec.client_start + offset as i64
}

fn sample_between(rng: &mut ChaCha8Rng, start: NaiveDateTime, end: NaiveDateTime) -> NaiveDateTime {
    let span = (end - start).num_seconds();
    if span <= 0 {
        return start;
    }
    start + Duration::seconds(rng.random_range(0..span))
}

fn add_window(issued_at: NaiveDateTime, months: u32, days: u64) -> NaiveDateTime {
    issued_at
        .checked_add_months(Months::new(months))
        .and_then(|at| at.checked_add_days(Days::new(days)))
        .unwrap_or_else(|| issued_at + Duration::days(months as i64 * 30 + days as i64))
}

/// Number of whole calendar months that fit between `start` and `end`.
fn whole_months_between(start: NaiveDateTime, end: NaiveDateTime) -> u32 {
    if end <= start {
        return 0;
    }
    let mut months =
        (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
    while months > 0
        && start
            .checked_add_months(Months::new(months as u32))
            .is_none_or(|at| at > end)
    {
        months -= 1;
    }
    months.max(0) as u32
}

fn shard_seed(seed: u64, shard_index: usize) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in (shard_index as u64).to_le_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::plan_shards;
    use chrono::NaiveDate;

    fn reference_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|date| date.and_hms_opt(12, 0, 0))
            .expect("valid reference time")
    }

    #[test]
    fn identical_inputs_reproduce_identical_records() {
        let shards = plan_shards(50, 400, 3);
        let synth = CertificateSynthesizer::new(42, reference_time());
        for spec in &shards {
            let first = synth.generate_shard(spec).expect("generate");
            let second = synth.generate_shard(spec).expect("generate again");
            assert_eq!(first, second);
        }
    }

    #[test]
    fn counts_sum_exactly_and_respect_the_cap() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for (clients, target) in [(10u64, 130u64), (5, 100), (1, 20), (8, 0), (3, 41)] {
            let counts = draw_client_counts(&mut rng, clients, target);
            assert_eq!(counts.iter().map(|&count| count as u64).sum::<u64>(), target);
            assert!(counts.iter().all(|&count| count as u64 <= MAX_ACTIVE_PER_CLIENT));
        }
    }

    #[test]
    fn windows_stay_within_the_validity_bounds() {
        let shards = plan_shards(40, 600, 2);
        let synth = CertificateSynthesizer::new(9, reference_time());
        for spec in &shards {
            for record in synth.generate_shard(spec).expect("generate") {
                assert!(record.issued_at < record.expires_at);
                let min_expiry = record
                    .issued_at
                    .checked_add_months(Months::new(MIN_VALIDITY_MONTHS))
                    .expect("min expiry");
                let max_expiry = record
                    .issued_at
                    .checked_add_months(Months::new(MAX_VALIDITY_MONTHS))
                    .expect("max expiry");
                assert!(record.expires_at >= min_expiry, "window below 3 months");
                assert!(record.expires_at <= max_expiry, "window above 20 years");
            }
        }
    }

    #[test]
    fn active_count_per_client_never_exceeds_the_cap() {
        let reference = reference_time();
        let shards = plan_shards(30, 550, 2);
        let synth = CertificateSynthesizer::new(3, reference);
        let mut active = std::collections::HashMap::new();
        for spec in &shards {
            for record in synth.generate_shard(spec).expect("generate") {
                if record.is_active_at(reference) {
                    *active.entry(record.client_id).or_insert(0u64) += 1;
                }
            }
        }
        for (client_id, count) in active {
            assert!(
                count <= MAX_ACTIVE_PER_CLIENT,
                "client {client_id} holds {count} active certificates"
            );
        }
    }

    #[test]
    fn zero_quota_produces_an_empty_shard() {
        let spec = ShardSpec {
            index: 0,
            client_start: 1,
            client_count: 5,
            cert_quota: 0,
            id_base: 1,
            id_stride: 1,
        };
        let synth = CertificateSynthesizer::new(1, reference_time());
        assert!(synth.generate_shard(&spec).expect("generate").is_empty());
    }

    #[test]
    fn quota_beyond_capacity_activates_reuse() {
        let reference = reference_time();
        let shards = plan_shards(10, 500, 1);
        let synth = CertificateSynthesizer::new(42, reference);
        let records = synth.generate_shard(&shards[0]).expect("generate");
        assert_eq!(records.len(), 500);

        let mut by_id: std::collections::HashMap<i64, Vec<&CertificateRecord>> =
            std::collections::HashMap::new();
        for record in &records {
            by_id.entry(record.certificate_id).or_default().push(record);
        }
        assert!(
            by_id.values().any(|windows| windows.len() > 1),
            "quota above 20x clients must reuse certificate ids"
        );

        for windows in by_id.values_mut() {
            windows.sort_by_key(|record| record.issued_at);
            for pair in windows.windows(2) {
                assert!(
                    pair[0].expires_at <= pair[1].issued_at,
                    "reused id has overlapping validity windows"
                );
                assert_ne!(
                    pair[0].client_id, pair[1].client_id,
                    "reused id kept the same owner"
                );
            }
        }
    }

    #[test]
    fn infeasible_quota_fails_fast() {
        let spec = ShardSpec {
            index: 0,
            client_start: 1,
            client_count: 1,
            cert_quota: max_feasible_records(1) + 1,
            id_base: 1,
            id_stride: 20,
        };
        let synth = CertificateSynthesizer::new(5, reference_time());
        let err = synth.generate_shard(&spec).expect_err("must fail");
        assert!(matches!(err, SynthesisError::ConstraintViolation(_)));
    }
}
