//! Triangle reordering for post-transform vertex cache locality.
//!
//! Uses the Tipsify greedy walk: emit every pending triangle around a fan
//! vertex, then continue with the neighbour that is most likely still cached
//! and has the fewest live triangles left. Winding order of each triangle is
//! preserved, only the triangle order changes.

/// Simulated FIFO cache size the walk optimizes for.
pub const CACHE_SIZE: u32 = 16;

pub fn optimize_vertex_cache(indices: &[u32], vertex_count: usize) -> Vec<u32> {
    let triangle_count = indices.len() / 3;
    if triangle_count == 0 {
        return Vec::new();
    }
    let vertex_count = indices
        .iter()
        .map(|&i| i as usize + 1)
        .max()
        .unwrap_or(0)
        .max(vertex_count);

    // Vertex -> triangle adjacency in CSR form
    let mut live = vec![0u32; vertex_count];
    for &i in &indices[..triangle_count * 3] {
        live[i as usize] += 1;
    }
    let mut offsets = vec![0usize; vertex_count + 1];
    for v in 0..vertex_count {
        offsets[v + 1] = offsets[v] + live[v] as usize;
    }
    let mut fill = offsets.clone();
    let mut adjacency = vec![0usize; offsets[vertex_count]];
    for t in 0..triangle_count {
        for k in 0..3 {
            let v = indices[t * 3 + k] as usize;
            adjacency[fill[v]] = t;
            fill[v] += 1;
        }
    }

    let mut cache_time = vec![0u32; vertex_count];
    let mut emitted = vec![false; triangle_count];
    let mut dead_end: Vec<u32> = Vec::new();
    let mut out = Vec::with_capacity(triangle_count * 3);
    let mut timestamp = CACHE_SIZE + 1;
    let mut cursor = 0usize;
    let mut fan = Some(indices[0]);

    while let Some(f) = fan {
        let mut candidates: Vec<u32> = Vec::new();
        for &t in &adjacency[offsets[f as usize]..offsets[f as usize + 1]] {
            if emitted[t] {
                continue;
            }
            emitted[t] = true;
            for k in 0..3 {
                let v = indices[t * 3 + k];
                out.push(v);
                dead_end.push(v);
                candidates.push(v);
                live[v as usize] -= 1;
                if timestamp - cache_time[v as usize] > CACHE_SIZE {
                    cache_time[v as usize] = timestamp;
                    timestamp += 1;
                }
            }
        }
        fan = next_fan_vertex(&candidates, &live, &cache_time, timestamp, &mut dead_end, &mut cursor);
    }
    out
}

fn next_fan_vertex(
    candidates: &[u32],
    live: &[u32],
    cache_time: &[u32],
    timestamp: u32,
    dead_end: &mut Vec<u32>,
    cursor: &mut usize,
) -> Option<u32> {
    let mut best = None;
    let mut best_priority = -1i64;
    for &v in candidates {
        let v_live = live[v as usize];
        if v_live == 0 {
            continue;
        }
        let age = timestamp - cache_time[v as usize];
        let priority = if age + 2 * v_live <= CACHE_SIZE { age as i64 } else { 0 };
        if priority > best_priority {
            best_priority = priority;
            best = Some(v);
        }
    }
    if best.is_some() {
        return best;
    }
    while let Some(d) = dead_end.pop() {
        if live[d as usize] > 0 {
            return Some(d);
        }
    }
    while *cursor < live.len() {
        if live[*cursor] > 0 {
            return Some(*cursor as u32);
        }
        *cursor += 1;
    }
    None
}

/// Average cache miss ratio (transformed vertices per triangle) for a FIFO
/// cache of `cache_size` entries.
pub fn average_cache_miss_ratio(indices: &[u32], cache_size: usize) -> f32 {
    let triangle_count = indices.len() / 3;
    if triangle_count == 0 {
        return 0.0;
    }
    let mut cache: std::collections::VecDeque<u32> = std::collections::VecDeque::with_capacity(cache_size);
    let mut misses = 0usize;
    for &i in &indices[..triangle_count * 3] {
        if !cache.contains(&i) {
            misses += 1;
            if cache.len() == cache_size {
                cache.pop_front();
            }
            cache.push_back(i);
        }
    }
    misses as f32 / triangle_count as f32
}
