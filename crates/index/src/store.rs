//! Fixed-capacity node store.
//!
//! Every node is a payload (raw vector or PQ code), `M` outgoing link
//! slots, and a `u64` label. The three regions live in parallel arenas
//! preallocated to full capacity at construction; nodes are appended and
//! never freed, only relocated in place by reordering.
//!
//! A link slot holding the owning node's own id is the *self-loop
//! sentinel*, meaning "unused". Freshly allocated nodes have all `M`
//! slots set to the sentinel.

/// Payload arena: raw `f32` vectors or PQ code bytes, never both.
#[derive(Debug)]
enum PayloadArena {
    Vectors { data: Vec<f32>, dim: usize },
    Codes { data: Vec<u8>, code_size: usize },
}

/// Preallocated arenas holding up to `capacity` nodes.
#[derive(Debug)]
pub struct NodeStore {
    max_degree: usize,
    capacity: usize,
    len: usize,
    payload: PayloadArena,
    links: Vec<u32>,
    labels: Vec<u64>,
}

impl NodeStore {
    /// Store for raw `dim`-dimensional vector payloads.
    pub fn for_vectors(dim: usize, max_degree: usize, capacity: usize) -> Self {
        Self {
            max_degree,
            capacity,
            len: 0,
            payload: PayloadArena::Vectors {
                data: vec![0.0; capacity * dim],
                dim,
            },
            links: vec![0; capacity * max_degree],
            labels: vec![0; capacity],
        }
    }

    /// Store for PQ code payloads of `code_size` bytes.
    pub fn for_codes(code_size: usize, max_degree: usize, capacity: usize) -> Self {
        Self {
            max_degree,
            capacity,
            len: 0,
            payload: PayloadArena::Codes {
                data: vec![0; capacity * code_size],
                code_size,
            },
            links: vec![0; capacity * max_degree],
            labels: vec![0; capacity],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Width of one stored payload in bytes.
    pub fn data_size_bytes(&self) -> usize {
        match &self.payload {
            PayloadArena::Vectors { dim, .. } => dim * std::mem::size_of::<f32>(),
            PayloadArena::Codes { code_size, .. } => *code_size,
        }
    }

    /// Width of one logical node record in bytes: payload, links, label.
    pub fn node_size_bytes(&self) -> usize {
        self.data_size_bytes()
            + self.max_degree * std::mem::size_of::<u32>()
            + std::mem::size_of::<u64>()
    }

    /// Append a raw vector payload. Returns the new id, or `None` when full.
    pub fn allocate_vector(&mut self, vector: &[f32], label: u64) -> Option<u32> {
        if self.is_full() {
            return None;
        }
        match &mut self.payload {
            PayloadArena::Vectors { data, dim } => {
                debug_assert_eq!(vector.len(), *dim);
                let start = self.len * *dim;
                data[start..start + *dim].copy_from_slice(vector);
            }
            PayloadArena::Codes { .. } => unreachable!("raw vector payload on a quantized store"),
        }
        Some(self.finish_allocation(label))
    }

    /// Append a PQ code payload. Returns the new id, or `None` when full.
    pub fn allocate_code(&mut self, code: &[u8], label: u64) -> Option<u32> {
        if self.is_full() {
            return None;
        }
        match &mut self.payload {
            PayloadArena::Codes { data, code_size } => {
                debug_assert_eq!(code.len(), *code_size);
                let start = self.len * *code_size;
                data[start..start + *code_size].copy_from_slice(code);
            }
            PayloadArena::Vectors { .. } => unreachable!("code payload on an exact store"),
        }
        Some(self.finish_allocation(label))
    }

    /// Write the label, set every link slot to the self-loop sentinel, and
    /// bump the occupancy counter.
    fn finish_allocation(&mut self, label: u64) -> u32 {
        let id = self.len as u32;
        self.labels[self.len] = label;
        let start = self.len * self.max_degree;
        self.links[start..start + self.max_degree].fill(id);
        self.len += 1;
        id
    }

    /// Raw vector payload of node `id`. Exact-mode stores only.
    #[inline]
    pub fn vector(&self, id: u32) -> &[f32] {
        match &self.payload {
            PayloadArena::Vectors { data, dim } => {
                let start = id as usize * dim;
                &data[start..start + dim]
            }
            PayloadArena::Codes { .. } => unreachable!("vector() on a quantized store"),
        }
    }

    /// PQ code payload of node `id`. Quantized stores only.
    #[inline]
    pub fn code(&self, id: u32) -> &[u8] {
        match &self.payload {
            PayloadArena::Codes { data, code_size } => {
                let start = id as usize * code_size;
                &data[start..start + code_size]
            }
            PayloadArena::Vectors { .. } => unreachable!("code() on an exact store"),
        }
    }

    /// The `M` link slots of node `id`, self-loop sentinels included.
    #[inline]
    pub fn links(&self, id: u32) -> &[u32] {
        let start = id as usize * self.max_degree;
        &self.links[start..start + self.max_degree]
    }

    #[inline]
    pub fn links_mut(&mut self, id: u32) -> &mut [u32] {
        let start = id as usize * self.max_degree;
        &mut self.links[start..start + self.max_degree]
    }

    #[inline]
    pub fn label(&self, id: u32) -> u64 {
        self.labels[id as usize]
    }

    /// Swap two node rows across every arena.
    pub(crate) fn swap_nodes(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        match &mut self.payload {
            PayloadArena::Vectors { data, dim } => swap_rows(data, a, b, *dim),
            PayloadArena::Codes { data, code_size } => swap_rows(data, a, b, *code_size),
        }
        swap_rows(&mut self.links, a, b, self.max_degree);
        self.labels.swap(a, b);
    }

    // Raw-arena views and reconstruction, used by the persistence codec.

    pub(crate) fn vectors_arena(&self) -> Option<&[f32]> {
        match &self.payload {
            PayloadArena::Vectors { data, .. } => Some(data),
            PayloadArena::Codes { .. } => None,
        }
    }

    pub(crate) fn codes_arena(&self) -> Option<&[u8]> {
        match &self.payload {
            PayloadArena::Codes { data, .. } => Some(data),
            PayloadArena::Vectors { .. } => None,
        }
    }

    pub(crate) fn links_arena(&self) -> &[u32] {
        &self.links
    }

    pub(crate) fn labels_arena(&self) -> &[u64] {
        &self.labels
    }

    pub(crate) fn from_vectors_raw(
        dim: usize,
        max_degree: usize,
        capacity: usize,
        len: usize,
        data: Vec<f32>,
        links: Vec<u32>,
        labels: Vec<u64>,
    ) -> Self {
        debug_assert_eq!(data.len(), capacity * dim);
        debug_assert_eq!(links.len(), capacity * max_degree);
        debug_assert_eq!(labels.len(), capacity);
        Self {
            max_degree,
            capacity,
            len,
            payload: PayloadArena::Vectors { data, dim },
            links,
            labels,
        }
    }

    pub(crate) fn from_codes_raw(
        code_size: usize,
        max_degree: usize,
        capacity: usize,
        len: usize,
        data: Vec<u8>,
        links: Vec<u32>,
        labels: Vec<u64>,
    ) -> Self {
        debug_assert_eq!(data.len(), capacity * code_size);
        debug_assert_eq!(links.len(), capacity * max_degree);
        debug_assert_eq!(labels.len(), capacity);
        Self {
            max_degree,
            capacity,
            len,
            payload: PayloadArena::Codes { data, code_size },
            links,
            labels,
        }
    }
}

/// Swap rows `a` and `b` of an arena with `row_len` elements per row.
fn swap_rows<T>(data: &mut [T], a: usize, b: usize, row_len: usize) {
    debug_assert_ne!(a, b);
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    let (left, right) = data.split_at_mut(hi * row_len);
    left[lo * row_len..(lo + 1) * row_len].swap_with_slice(&mut right[..row_len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_vectors() {
        let mut store = NodeStore::for_vectors(2, 3, 4);
        assert!(store.is_empty());
        assert_eq!(store.data_size_bytes(), 8);
        assert_eq!(store.node_size_bytes(), 8 + 12 + 8);

        let id = store.allocate_vector(&[1.0, 2.0], 42).unwrap();
        assert_eq!(id, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.vector(0), &[1.0, 2.0]);
        assert_eq!(store.label(0), 42);
        // All link slots start as self-loops
        assert_eq!(store.links(0), &[0, 0, 0]);
    }

    #[test]
    fn test_allocate_until_full() {
        let mut store = NodeStore::for_vectors(1, 2, 2);
        assert_eq!(store.allocate_vector(&[0.0], 0), Some(0));
        assert_eq!(store.allocate_vector(&[1.0], 1), Some(1));
        assert!(store.is_full());
        assert_eq!(store.allocate_vector(&[2.0], 2), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_allocate_codes() {
        let mut store = NodeStore::for_codes(4, 2, 3);
        assert_eq!(store.data_size_bytes(), 4);

        let id = store.allocate_code(&[1, 2, 3, 4], 7).unwrap();
        assert_eq!(store.code(id), &[1, 2, 3, 4]);
        assert_eq!(store.links(id), &[0, 0]);
        assert_eq!(store.label(id), 7);
    }

    #[test]
    fn test_self_loop_sentinel_uses_own_id() {
        let mut store = NodeStore::for_vectors(1, 2, 3);
        store.allocate_vector(&[0.0], 0);
        store.allocate_vector(&[1.0], 1);
        assert_eq!(store.links(1), &[1, 1]);
    }

    #[test]
    fn test_swap_nodes() {
        let mut store = NodeStore::for_vectors(2, 2, 3);
        store.allocate_vector(&[1.0, 1.0], 10);
        store.allocate_vector(&[2.0, 2.0], 20);
        store.links_mut(0)[0] = 1;
        store.links_mut(1)[0] = 0;

        store.swap_nodes(0, 1);

        assert_eq!(store.vector(0), &[2.0, 2.0]);
        assert_eq!(store.vector(1), &[1.0, 1.0]);
        assert_eq!(store.label(0), 20);
        assert_eq!(store.label(1), 10);
        assert_eq!(store.links(0), &[0, 1]);
        assert_eq!(store.links(1), &[1, 0]);
    }
}
