//! Rebuilding channel sequences from the raw scope buffer
//!
//! These are pure functions over bytes and layouts; [`ScopeEngine`](super::ScopeEngine)
//! feeds them what it read from the device.

use crate::error::{Result, X2cError};
use crate::types::{Representation, Value};

/// One bounded read of the scope buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub address: u64,
    pub size: usize,
}

/// Bytes of the buffer that hold complete rows
pub fn usable_length(buffer_size: usize, dataset_size: usize) -> usize {
    if dataset_size == 0 {
        return 0;
    }
    buffer_size - buffer_size % dataset_size
}

/// Split `length` bytes from `base` into sequential reads of at most `max_chunk` bytes
pub fn plan_chunks(base: u64, length: usize, max_chunk: usize) -> Vec<Chunk> {
    let max_chunk = max_chunk.max(1);
    (0..length)
        .step_by(max_chunk)
        .map(|offset| Chunk {
            address: base + offset as u64,
            size: max_chunk.min(length - offset),
        })
        .collect()
}

/// Bytes of the rows that no failed chunk touches.
///
/// `data` is the whole usable buffer read from `base`, with failed chunks
/// zero-filled in place. A row overlapping a failed chunk is dropped whole,
/// so every row after a gap still starts on a row boundary.
pub fn complete_rows(data: &[u8], base: u64, failed: &[Chunk], dataset_size: usize) -> Vec<u8> {
    if dataset_size == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(data.len());
    for (index, row) in data.chunks_exact(dataset_size).enumerate() {
        let start = base + (index * dataset_size) as u64;
        let end = start + dataset_size as u64;
        let touched = failed
            .iter()
            .any(|c| c.address < end && start < c.address + c.size as u64);
        if !touched {
            out.extend_from_slice(row);
        }
    }
    out
}

/// Decode rows of concatenated channel bytes into one sequence per channel.
///
/// A trailing partial row is dropped whole.
pub fn decode_rows(data: &[u8], layout: &[Representation]) -> Result<Vec<Vec<Value>>> {
    let dataset_size: usize = layout.iter().map(Representation::width).sum();
    let mut sequences: Vec<Vec<Value>> = layout.iter().map(|_| Vec::new()).collect();
    if dataset_size == 0 {
        return Ok(sequences);
    }

    let rows = data.len() / dataset_size;
    for sequence in &mut sequences {
        sequence.reserve(rows);
    }

    for (row_index, row) in data.chunks_exact(dataset_size).enumerate() {
        let mut offset = 0;
        for (rep, sequence) in layout.iter().zip(sequences.iter_mut()) {
            let width = rep.width();
            let value = rep.decode(&row[offset..offset + width]).ok_or_else(|| {
                X2cError::SizeMismatch {
                    address: (row_index * dataset_size + offset) as u64,
                    expected: width,
                    actual: row.len() - offset,
                }
            })?;
            sequence.push(value);
            offset += width;
        }
    }

    Ok(sequences)
}

/// Rotate every sequence so `delayed_index` becomes the first sample.
///
/// Negative indices count from the end. An index outside `-len..len`
/// leaves the sequence as it is, like `seq[i:] + seq[:i]` slicing. All
/// sequences receive the same rotation so rows stay aligned across channels.
pub fn realign(sequences: &mut [Vec<Value>], delayed_index: i64) {
    for sequence in sequences.iter_mut() {
        let len = sequence.len() as i64;
        if delayed_index >= len || delayed_index < -len {
            continue;
        }
        let start = delayed_index.rem_euclid(len) as usize;
        sequence.rotate_left(start);
    }
}

/// Realized capture window in milliseconds
pub fn sample_time_ms(
    period_us: f64,
    buffer_size: usize,
    dataset_size: usize,
    sample_time_factor: u32,
) -> f64 {
    if dataset_size == 0 {
        return 0.0;
    }
    let samples = (buffer_size / dataset_size) as f64;
    let window_ms = period_us * samples / 1000.0;
    f64::from(sample_time_factor) * window_ms * 2.0
}
