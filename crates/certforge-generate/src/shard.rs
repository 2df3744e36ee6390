use crate::synth::MAX_ACTIVE_PER_CLIENT;

/// One worker's slice of the client-id space and its certificate quota.
///
/// Shard id ranges are disjoint by construction, so synthesizers never need
/// cross-thread coordination to keep certificate numbers globally unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    pub index: usize,
    /// First client id owned by this shard (inclusive). Client ids start at 1.
    pub client_start: i64,
    /// Number of clients in this shard.
    pub client_count: u64,
    /// Certificate records this shard must emit, primary plus reused.
    pub cert_quota: u64,
    /// First certificate id of this shard's primary range.
    pub id_base: i64,
    /// Width of every shard's primary id range.
    pub id_stride: u64,
}

impl ShardSpec {
    /// Last client id owned by this shard (inclusive).
    pub fn client_end(&self) -> i64 {
        self.client_start + self.client_count as i64 - 1
    }

    /// Most primary (non-reused) records this shard can hold.
    pub fn primary_capacity(&self) -> u64 {
        self.cert_quota
            .min(self.client_count.saturating_mul(MAX_ACTIVE_PER_CLIENT))
    }
}

/// Partition `num_clients` and `num_certificates` across up to `worker_count`
/// shards.
///
/// Client ranges are contiguous and near-equal, with the remainder going to
/// the first shards. Certificate quotas are proportional to range sizes, the
/// remainder again going to the first shards, so quotas always sum to exactly
/// `num_certificates` — no shard may silently drop or duplicate records.
pub fn plan_shards(num_clients: u64, num_certificates: u64, worker_count: usize) -> Vec<ShardSpec> {
    if num_clients == 0 {
        return Vec::new();
    }
    let shard_count = (worker_count.max(1) as u64).min(num_clients);

    let clients_base = num_clients / shard_count;
    let clients_rem = num_clients % shard_count;

    let mut client_counts = Vec::with_capacity(shard_count as usize);
    for index in 0..shard_count {
        let extra = if index < clients_rem { 1 } else { 0 };
        client_counts.push(clients_base + extra);
    }

    let mut quotas = Vec::with_capacity(shard_count as usize);
    let mut assigned = 0u64;
    for count in &client_counts {
        let quota = num_certificates * count / num_clients;
        quotas.push(quota);
        assigned += quota;
    }
    let mut remainder = num_certificates - assigned;
    for quota in quotas.iter_mut() {
        if remainder == 0 {
            break;
        }
        *quota += 1;
        remainder -= 1;
    }

    let id_stride = client_counts
        .iter()
        .zip(&quotas)
        .map(|(count, quota)| (*quota).min(count.saturating_mul(MAX_ACTIVE_PER_CLIENT)))
        .max()
        .unwrap_or(1)
        .max(1);

    let mut shards = Vec::with_capacity(shard_count as usize);
    let mut client_start = 1i64;
    for (index, (count, quota)) in client_counts.into_iter().zip(quotas).enumerate() {
        shards.push(ShardSpec {
            index,
            client_start,
            client_count: count,
            cert_quota: quota,
            id_base: 1 + (index as u64 * id_stride) as i64,
            id_stride,
        });
        client_start += count as i64;
    }
    shards
}
