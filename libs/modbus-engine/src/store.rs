//! Slave register store
//!
//! Each bank is a sparse address space made of segments. Segments are kept
//! sorted by start address, never overlap, and two segments that touch are
//! always merged into one. A consequence is that any fully defined address
//! range lies inside exactly one segment.

use crate::error::StoreError;
use crate::pdu::FunctionCode;

/// Exclusive upper bound of the address space
const ADDRESS_SPACE: u32 = 0x1_0000;

/// A run of consecutive addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<T> {
    pub start: u16,
    pub values: Vec<T>,
}

impl<T> Segment<T> {
    /// One past the last address
    fn end(&self) -> u32 {
        u32::from(self.start) + self.values.len() as u32
    }
}

/// Sparse bank of coils, inputs or registers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank<T> {
    segments: Vec<Segment<T>>,
}

impl<T> Default for RegisterBank<T> {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
        }
    }
}

fn range_end(start: u16, count: usize) -> Result<u32, StoreError> {
    if count == 0 {
        return Err(StoreError::Empty);
    }
    let end = u32::from(start) + count as u32;
    if count > ADDRESS_SPACE as usize || end > ADDRESS_SPACE {
        return Err(StoreError::OutOfRange { start, count });
    }
    Ok(end)
}

impl<T: Copy> RegisterBank<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `values` at `start`, overwriting any addresses already defined
    pub fn add(&mut self, start: u16, values: &[T]) -> Result<(), StoreError> {
        let end = range_end(start, values.len())?;
        self.cut(u32::from(start), end);

        let index = self.segments.partition_point(|s| s.start < start);
        self.segments.insert(
            index,
            Segment {
                start,
                values: values.to_vec(),
            },
        );

        if index + 1 < self.segments.len()
            && self.segments[index].end() == u32::from(self.segments[index + 1].start)
        {
            let next = self.segments.remove(index + 1);
            self.segments[index].values.extend(next.values);
        }
        if index > 0 && self.segments[index - 1].end() == u32::from(self.segments[index].start) {
            let current = self.segments.remove(index);
            self.segments[index - 1].values.extend(current.values);
        }
        Ok(())
    }

    /// Undefine `count` addresses from `start`; undefined addresses are skipped
    pub fn remove(&mut self, start: u16, count: usize) -> Result<(), StoreError> {
        let end = range_end(start, count)?;
        self.cut(u32::from(start), end);
        Ok(())
    }

    fn cut(&mut self, start: u32, end: u32) {
        let first = self.segments.partition_point(|s| s.end() <= start);
        let last = self.segments.partition_point(|s| u32::from(s.start) < end);
        if first >= last {
            return;
        }

        let mut remainders = Vec::with_capacity(2);
        let head = &self.segments[first];
        if u32::from(head.start) < start {
            let keep = (start - u32::from(head.start)) as usize;
            remainders.push(Segment {
                start: head.start,
                values: head.values[..keep].to_vec(),
            });
        }
        let tail = &self.segments[last - 1];
        if tail.end() > end {
            let skip = (end - u32::from(tail.start)) as usize;
            remainders.push(Segment {
                start: end as u16,
                values: tail.values[skip..].to_vec(),
            });
        }
        self.segments.splice(first..last, remainders);
    }

    fn containing(&self, start: u16, end: u32) -> Option<usize> {
        let index = self.segments.partition_point(|s| s.start <= start).checked_sub(1)?;
        (self.segments[index].end() >= end).then_some(index)
    }

    /// Overwrite already defined addresses
    pub fn set(&mut self, start: u16, values: &[T]) -> Result<(), StoreError> {
        let end = range_end(start, values.len())?;
        let index = self.containing(start, end).ok_or(StoreError::NotCovered {
            start,
            count: values.len(),
        })?;
        let segment = &mut self.segments[index];
        let offset = usize::from(start - segment.start);
        segment.values[offset..offset + values.len()].copy_from_slice(values);
        Ok(())
    }

    pub fn get(&self, start: u16, count: usize) -> Result<Vec<T>, StoreError> {
        let end = range_end(start, count)?;
        let index = self
            .containing(start, end)
            .ok_or(StoreError::NotCovered { start, count })?;
        let segment = &self.segments[index];
        let offset = usize::from(start - segment.start);
        Ok(segment.values[offset..offset + count].to_vec())
    }

    pub fn get_one(&self, address: u16) -> Option<T> {
        let index = self.containing(address, u32::from(address) + 1)?;
        let segment = &self.segments[index];
        segment.values.get(usize::from(address - segment.start)).copied()
    }

    /// True when every address in `[start, start + count)` is defined
    pub fn covers(&self, start: u16, count: usize) -> bool {
        range_end(start, count)
            .ok()
            .and_then(|end| self.containing(start, end))
            .is_some()
    }

    pub fn segments(&self) -> &[Segment<T>] {
        &self.segments
    }

    /// Number of defined addresses
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// The four Modbus data banks of one slave
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterStore {
    pub coils: RegisterBank<bool>,
    pub discrete_inputs: RegisterBank<bool>,
    pub holding_registers: RegisterBank<u16>,
    pub input_registers: RegisterBank<u16>,
}

impl RegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bit bank addressed by a function code
    pub fn bit_bank(&self, function: FunctionCode) -> Option<&RegisterBank<bool>> {
        match function {
            FunctionCode::ReadCoils
            | FunctionCode::WriteSingleCoil
            | FunctionCode::WriteMultipleCoils => Some(&self.coils),
            FunctionCode::ReadDiscreteInputs => Some(&self.discrete_inputs),
            _ => None,
        }
    }

    /// Register bank addressed by a function code
    pub fn word_bank(&self, function: FunctionCode) -> Option<&RegisterBank<u16>> {
        match function {
            FunctionCode::ReadHoldingRegisters
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleRegisters => Some(&self.holding_registers),
            FunctionCode::ReadInputRegisters => Some(&self.input_registers),
            _ => None,
        }
    }
}
