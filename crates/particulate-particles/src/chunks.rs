//! Coalescing of active ring slots into contiguous render spans.

use crate::ring::RingState;

/// A contiguous span of active vertices in the point buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferChunk {
    /// Byte offset of the first vertex.
    pub buffer_start: u64,
    /// Index of the first vertex.
    pub vertex_start: u32,
    pub num_vertices: u32,
}

impl BufferChunk {
    /// One past the last vertex.
    #[inline]
    pub fn vertex_end(&self) -> u32 {
        self.vertex_start + self.num_vertices
    }
}

/// Caches the chunk list and recomputes it when the ring reports changes.
#[derive(Debug, Default)]
pub struct ChunkCoalescer {
    chunks: Vec<BufferChunk>,
    recomputes: u64,
}

impl ChunkCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks as of the last recompute.
    pub fn chunks(&self) -> &[BufferChunk] {
        &self.chunks
    }

    /// Number of times the list was rebuilt.
    pub fn recomputes(&self) -> u64 {
        self.recomputes
    }

    /// Total vertices covered by the cached chunks.
    pub fn vertex_count(&self) -> u32 {
        self.chunks.iter().map(|c| c.num_vertices).sum()
    }

    /// Rebuild the chunk list if the ring is dirty, then clear the flag.
    pub fn recompute(&mut self, state: &mut RingState) -> &[BufferChunk] {
        if state.dirty {
            self.chunks = coalesce(state);
            self.recomputes += 1;
            state.dirty = false;
        }
        &self.chunks
    }
}

/// Run of consecutive active slots, in physical slot units.
#[derive(Clone, Copy)]
struct Run {
    start: u32,
    len: u32,
}

/// Build the minimal chunk list for the current active set.
///
/// Scans logical indices from `head` to `tail`. A run is cut where the
/// window crosses the physical end of the buffer. If the window covers the
/// whole ring and the newest run ends where the oldest begins, the two are
/// one contiguous span and are merged. Chunks come out oldest first.
pub fn coalesce(state: &RingState) -> Vec<BufferChunk> {
    if state.is_empty() {
        return Vec::new();
    }

    let mut runs: Vec<Run> = Vec::new();
    let mut current: Option<Run> = None;

    for logical in state.head()..state.tail() {
        let slot = state.slot(logical) as u32;
        let active = state.is_active_at(logical);

        if !active {
            if let Some(run) = current.take() {
                runs.push(run);
            }
            continue;
        }

        if current.is_some() && slot != 0 {
            if let Some(run) = current.as_mut() {
                run.len += 1;
            }
        } else {
            if let Some(run) = current.take() {
                runs.push(run);
            }
            current = Some(Run { start: slot, len: 1 });
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }

    if runs.len() >= 2 {
        let first = runs[0];
        let last = runs[runs.len() - 1];
        if last.start + last.len == first.start {
            runs.pop();
            runs[0] = Run {
                start: last.start,
                len: last.len + first.len,
            };
        }
    }

    let batch_size = state.batch_size();
    let stride = u64::from(state.stride());
    runs.into_iter()
        .map(|run| {
            let vertex_start = run.start * batch_size;
            BufferChunk {
                buffer_start: u64::from(vertex_start) * stride,
                vertex_start,
                num_vertices: run.len * batch_size,
            }
        })
        .collect()
}
