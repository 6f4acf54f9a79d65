use candle::Device;

pub fn device(cpu: bool) -> candle::Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else {
        Device::cuda_if_available(0)
    }
}

/// Dataset indices a distributed sampler hands to `rank`, without shuffling.
///
/// Indices are dealt round-robin and the tail wraps around to the start so
/// that every rank gets the same number of samples.
pub fn shard_indices(len: usize, rank: usize, world_size: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let per_rank = len.div_ceil(world_size);
    (0..per_rank * world_size)
        .skip(rank)
        .step_by(world_size)
        .map(|i| i % len)
        .collect()
}
