//! Single-file binary persistence for the index.
//!
//! File layout (little-endian):
//! ```text
//! HEADER (fixed size):
//!   magic: "FGIDX1\0" (7 bytes)
//!   version: u32
//!   max_degree: u64
//!   data_size_bytes: u64
//!   node_size_bytes: u64
//!   capacity: u64
//!   len: u64
//!   dim: u64
//!   num_initializations: u64
//!   metric: u8
//!   visited_generation: u16
//!   quantized: u8
//!
//! QUANTIZER (only when quantized):
//!   block_len: u64
//!   quantizer codec block
//!
//! ARENAS (full capacity, in node-id order):
//!   payload arena: capacity * data_size_bytes
//!   link arena:    capacity * max_degree u32 values
//!   label arena:   capacity u64 values
//! ```
//!
//! `node_size_bytes` is redundant with the other header fields and is
//! validated on load as a consistency check.

use crate::error::{GraphError, GraphResult};
use crate::graph::{FlatGraph, GraphConfig};
use crate::store::NodeStore;
use crate::visited::VisitedSet;
use flatgraph_pq::ProductQuantizer;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Magic bytes for index files.
pub const INDEX_MAGIC: &[u8; 7] = b"FGIDX1\0";

/// Current index format version.
pub const INDEX_VERSION: u32 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 7 + 4 + 7 * 8 + 1 + 2 + 1;

impl FlatGraph {
    /// Write the index to a single binary file.
    pub fn save(&self, path: impl AsRef<Path>) -> GraphResult<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);

        w.write_all(INDEX_MAGIC)?;
        w.write_all(&INDEX_VERSION.to_le_bytes())?;
        w.write_all(&(self.config.max_degree as u64).to_le_bytes())?;
        w.write_all(&(self.store.data_size_bytes() as u64).to_le_bytes())?;
        w.write_all(&(self.store.node_size_bytes() as u64).to_le_bytes())?;
        w.write_all(&(self.store.capacity() as u64).to_le_bytes())?;
        w.write_all(&(self.store.len() as u64).to_le_bytes())?;
        w.write_all(&(self.dim as u64).to_le_bytes())?;
        w.write_all(&(self.config.num_initializations as u64).to_le_bytes())?;
        w.write_all(&[self.config.metric.to_byte()])?;
        w.write_all(&self.visited.generation().to_le_bytes())?;
        w.write_all(&[self.quantizer.is_some() as u8])?;

        if let Some(pq) = &self.quantizer {
            let block = pq.to_bytes();
            w.write_all(&(block.len() as u64).to_le_bytes())?;
            w.write_all(&block)?;
        }

        match self.store.vectors_arena() {
            Some(vectors) => {
                for &v in vectors {
                    w.write_all(&v.to_le_bytes())?;
                }
            }
            None => {
                let codes = self.store.codes_arena().expect("store has exactly one arena kind");
                w.write_all(codes)?;
            }
        }
        for &link in self.store.links_arena() {
            w.write_all(&link.to_le_bytes())?;
        }
        for &label in self.store.labels_arena() {
            w.write_all(&label.to_le_bytes())?;
        }

        w.flush()?;
        Ok(())
    }

    /// Load an index written by [`FlatGraph::save`].
    pub fn load(path: impl AsRef<Path>) -> GraphResult<Self> {
        let data = fs::read(path)?;
        if data.len() < HEADER_SIZE {
            return Err(GraphError::InvalidData("index file too short".into()));
        }
        if &data[0..7] != INDEX_MAGIC {
            return Err(GraphError::InvalidData("bad magic bytes".into()));
        }

        let mut offset = 7usize;
        let version = read_u32(&data, &mut offset)?;
        if version != INDEX_VERSION {
            return Err(GraphError::InvalidData(format!(
                "unsupported index version {}",
                version
            )));
        }

        let max_degree = read_u64(&data, &mut offset)? as usize;
        let data_size_bytes = read_u64(&data, &mut offset)? as usize;
        let node_size_bytes = read_u64(&data, &mut offset)? as usize;
        let capacity = read_u64(&data, &mut offset)? as usize;
        let len = read_u64(&data, &mut offset)? as usize;
        let dim = read_u64(&data, &mut offset)? as usize;
        let num_initializations = read_u64(&data, &mut offset)? as usize;
        let metric_byte = read_u8(&data, &mut offset)?;
        let visited_generation = read_u16(&data, &mut offset)?;
        let quantized = read_u8(&data, &mut offset)? != 0;

        let metric = flatgraph_core::Metric::from_byte(metric_byte).ok_or_else(|| {
            GraphError::InvalidData(format!("invalid metric byte {}", metric_byte))
        })?;

        let config = GraphConfig {
            max_degree,
            capacity,
            metric,
            num_initializations,
        };
        config.validate().map_err(|_| {
            GraphError::InvalidData("corrupt header: invalid graph parameters".into())
        })?;
        if dim == 0 {
            return Err(GraphError::InvalidData("corrupt header: dim is 0".into()));
        }
        if len > capacity {
            return Err(GraphError::InvalidData(format!(
                "corrupt header: {} nodes exceed capacity {}",
                len, capacity
            )));
        }

        let expected_node_size =
            data_size_bytes + max_degree * std::mem::size_of::<u32>() + std::mem::size_of::<u64>();
        if node_size_bytes != expected_node_size {
            return Err(GraphError::InvalidData(format!(
                "corrupt header: node_size_bytes {} does not match layout {}",
                node_size_bytes, expected_node_size
            )));
        }

        let quantizer = if quantized {
            let block_len = read_u64(&data, &mut offset)? as usize;
            let end = offset
                .checked_add(block_len)
                .filter(|&e| e <= data.len())
                .ok_or_else(|| GraphError::InvalidData("truncated quantizer block".into()))?;
            let pq = ProductQuantizer::from_bytes(&data[offset..end])?;
            offset = end;

            if !pq.is_trained() {
                return Err(GraphError::QuantizerNotTrained);
            }
            if pq.dim() != dim {
                return Err(GraphError::InvalidData(format!(
                    "quantizer dim {} does not match index dim {}",
                    pq.dim(),
                    dim
                )));
            }
            if pq.metric() != metric {
                return Err(GraphError::InvalidData(
                    "quantizer metric does not match index metric".into(),
                ));
            }
            if pq.code_size() != data_size_bytes {
                return Err(GraphError::InvalidData(format!(
                    "quantizer code size {} does not match data_size_bytes {}",
                    pq.code_size(),
                    data_size_bytes
                )));
            }
            Some(pq)
        } else {
            if data_size_bytes != dim * std::mem::size_of::<f32>() {
                return Err(GraphError::InvalidData(format!(
                    "data_size_bytes {} does not match {} f32 dims",
                    data_size_bytes, dim
                )));
            }
            None
        };

        let payload_bytes = capacity * data_size_bytes;
        let link_bytes = capacity * max_degree * std::mem::size_of::<u32>();
        let label_bytes = capacity * std::mem::size_of::<u64>();
        let expected_total = offset + payload_bytes + link_bytes + label_bytes;
        if data.len() != expected_total {
            return Err(GraphError::InvalidData(format!(
                "index file is {} bytes, layout requires {}",
                data.len(),
                expected_total
            )));
        }

        let store = if let Some(pq) = &quantizer {
            let codes = data[offset..offset + payload_bytes].to_vec();
            offset += payload_bytes;
            NodeStore::from_codes_raw(
                pq.code_size(),
                max_degree,
                capacity,
                len,
                codes,
                read_u32_arena(&data, &mut offset, capacity * max_degree),
                read_u64_arena(&data, &mut offset, capacity),
            )
        } else {
            let vectors = read_f32_arena(&data, &mut offset, capacity * dim);
            NodeStore::from_vectors_raw(
                dim,
                max_degree,
                capacity,
                len,
                vectors,
                read_u32_arena(&data, &mut offset, capacity * max_degree),
                read_u64_arena(&data, &mut offset, capacity),
            )
        };

        // Sanity-check link slots against the occupancy counter.
        for id in 0..len as u32 {
            for &link in store.links(id) {
                if link as usize >= len {
                    return Err(GraphError::InvalidData(format!(
                        "node {} links to {} beyond the {} live nodes",
                        id, link, len
                    )));
                }
            }
        }

        Ok(Self::from_parts(
            config,
            dim,
            store,
            VisitedSet::with_generation(capacity, visited_generation),
            quantizer,
        ))
    }
}

fn read_u8(data: &[u8], offset: &mut usize) -> GraphResult<u8> {
    let byte = *data
        .get(*offset)
        .ok_or_else(|| GraphError::InvalidData("truncated header".into()))?;
    *offset += 1;
    Ok(byte)
}

fn read_u16(data: &[u8], offset: &mut usize) -> GraphResult<u16> {
    let slice = data
        .get(*offset..*offset + 2)
        .ok_or_else(|| GraphError::InvalidData("truncated header".into()))?;
    *offset += 2;
    Ok(u16::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u32(data: &[u8], offset: &mut usize) -> GraphResult<u32> {
    let slice = data
        .get(*offset..*offset + 4)
        .ok_or_else(|| GraphError::InvalidData("truncated header".into()))?;
    *offset += 4;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u64(data: &[u8], offset: &mut usize) -> GraphResult<u64> {
    let slice = data
        .get(*offset..*offset + 8)
        .ok_or_else(|| GraphError::InvalidData("truncated header".into()))?;
    *offset += 8;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

// Arena readers assume the total-length check has already passed.

fn read_f32_arena(data: &[u8], offset: &mut usize, count: usize) -> Vec<f32> {
    let out = data[*offset..*offset + count * 4]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    *offset += count * 4;
    out
}

fn read_u32_arena(data: &[u8], offset: &mut usize, count: usize) -> Vec<u32> {
    let out = data[*offset..*offset + count * 4]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    *offset += count * 4;
    out
}

fn read_u64_arena(data: &[u8], offset: &mut usize, count: usize) -> Vec<u64> {
    let out = data[*offset..*offset + count * 8]
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    *offset += count * 8;
    out
}
