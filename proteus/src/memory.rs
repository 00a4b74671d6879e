//! Buffer references for request and response tensors
//!
//! Input data is never copied on the way in: a request holds an ordered
//! list of [`BufferRef`]s into caller-provided memory. `bytes::Bytes`
//! carries the reference count, so a buffer outlives every request and
//! response that points into it without any explicit lifetime contract.

use bytes::Bytes;

/// Where a buffer physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    Cpu,
    CpuPinned,
    Gpu,
}

/// One contiguous region of tensor bytes.
#[derive(Debug, Clone)]
pub struct BufferRef {
    pub data: Bytes,
    pub memory_type: MemoryType,
    pub memory_type_id: i64,
}

impl BufferRef {
    #[must_use]
    pub fn new(data: Bytes, memory_type: MemoryType, memory_type_id: i64) -> Self {
        Self {
            data,
            memory_type,
            memory_type_id,
        }
    }

    /// A zero-filled CPU buffer of the given size.
    #[must_use]
    pub fn zeroed(byte_size: usize) -> Self {
        Self::new(Bytes::from(vec![0u8; byte_size]), MemoryType::Cpu, 0)
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// An ordered sequence of buffer references making up one tensor's data.
///
/// A tensor's bytes may arrive in several chunks (e.g. one gRPC frame
/// per chunk); the logical content is the concatenation in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryReference {
    buffers: Vec<BufferRef>,
}

impl MemoryReference {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer reference. Empty buffers are dropped silently;
    /// returns the index of the appended buffer otherwise.
    pub fn add_buffer(&mut self, buffer: BufferRef) -> Option<usize> {
        if buffer.data.is_empty() {
            return None;
        }
        self.buffers.push(buffer);
        Some(self.buffers.len() - 1)
    }

    #[must_use]
    pub fn buffer_at(&self, idx: usize) -> Option<&BufferRef> {
        self.buffers.get(idx)
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn total_byte_size(&self) -> usize {
        self.buffers.iter().map(BufferRef::byte_size).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferRef> {
        self.buffers.iter()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// The logical content as one contiguous `Bytes`.
    ///
    /// Free when the reference holds a single buffer; otherwise the
    /// chunks are copied into a fresh allocation.
    #[must_use]
    pub fn concat(&self) -> Bytes {
        match self.buffers.len() {
            0 => Bytes::new(),
            1 => self.buffers[0].data.clone(),
            _ => {
                let mut out = Vec::with_capacity(self.total_byte_size());
                for b in &self.buffers {
                    out.extend_from_slice(&b.data);
                }
                Bytes::from(out)
            }
        }
    }
}

impl From<BufferRef> for MemoryReference {
    fn from(buffer: BufferRef) -> Self {
        let mut m = Self::new();
        m.add_buffer(buffer);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffers_are_dropped() {
        let mut m = MemoryReference::new();
        assert_eq!(
            m.add_buffer(BufferRef::new(Bytes::new(), MemoryType::Cpu, 0)),
            None
        );
        assert!(m.is_empty());
        assert_eq!(m.total_byte_size(), 0);
    }

    #[test]
    fn ordered_append_and_total() {
        let mut m = MemoryReference::new();
        m.add_buffer(BufferRef::new(Bytes::from_static(b"abc"), MemoryType::Cpu, 0));
        m.add_buffer(BufferRef::new(Bytes::from_static(b"de"), MemoryType::Cpu, 0));
        assert_eq!(m.buffer_count(), 2);
        assert_eq!(m.total_byte_size(), 5);
        assert_eq!(&m.buffer_at(0).unwrap().data[..], b"abc");
        assert_eq!(&m.buffer_at(1).unwrap().data[..], b"de");
        assert!(m.buffer_at(2).is_none());
    }

    #[test]
    fn concat_single_buffer_is_zero_copy() {
        let data = Bytes::from_static(b"payload");
        let m: MemoryReference = BufferRef::new(data.clone(), MemoryType::Cpu, 0).into();
        let joined = m.concat();
        assert_eq!(joined, data);
        // Same backing storage, not a copy.
        assert_eq!(joined.as_ptr(), data.as_ptr());
    }

    #[test]
    fn concat_multiple_buffers() {
        let mut m = MemoryReference::new();
        m.add_buffer(BufferRef::new(Bytes::from_static(b"ab"), MemoryType::Cpu, 0));
        m.add_buffer(BufferRef::new(Bytes::from_static(b"cd"), MemoryType::Cpu, 0));
        assert_eq!(&m.concat()[..], b"abcd");
    }

    #[test]
    fn zeroed_allocation() {
        let b = BufferRef::zeroed(16);
        assert_eq!(b.byte_size(), 16);
        assert!(b.data.iter().all(|&x| x == 0));
        assert_eq!(b.memory_type, MemoryType::Cpu);
    }
}
