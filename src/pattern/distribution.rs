//! Splitting a population (threads, rate quota) into near-equal parts.

/// Splits `total` into `parts` shares differing by at most one; the first
/// `total % parts` shares get the extra unit.
pub fn even_load(total: u32, parts: u32) -> Vec<u32> {
    if parts == 0 {
        return Vec::new();
    }
    let base = total / parts;
    let extra = total % parts;
    (0..parts)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

/// Launch group sizes. A zero ramp-up interval collapses everything into
/// one group; otherwise full steps first and the remainder last.
pub fn group_sizes(thread_count: u32, threads_per_step: u32, ramp_up_interval_ms: u64) -> Vec<u32> {
    if thread_count == 0 {
        return Vec::new();
    }
    if ramp_up_interval_ms == 0 || threads_per_step == 0 {
        return vec![thread_count];
    }
    let full_groups = thread_count / threads_per_step;
    let remainder = thread_count % threads_per_step;

    let mut sizes = vec![threads_per_step; full_groups as usize];
    if remainder > 0 {
        sizes.push(remainder);
    }
    sizes
}
