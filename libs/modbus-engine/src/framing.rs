//! Receive state machine shared by master and slave
//!
//! `Idle -> Receiving -> {Valid | Invalid | Timeout} -> Idle`
//!
//! The master knows what it is waiting for, so [`ResponseCollector`] closes a
//! frame as soon as the function-code specific length (RTU) or the MBAP length
//! (TCP) has arrived. A slave on a serial line does not, so
//! [`RtuFrameAssembler`] delimits frames by line silence: a gap of at least one
//! inter-frame delay ends the current frame.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::codec::rtu::{self, expected_len, FrameLength};
use crate::codec::MbapHeader;
use crate::constants::{MAX_REQUEST_RTU_ADU, MAX_RTU_ADU, MBAP_HEADER_LEN};
use crate::error::FrameError;
use crate::pdu::FrameKind;

/// Receive progress of a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// Nothing buffered
    Idle,
    /// Bytes arriving, length or CRC unresolved
    Receiving,
    /// Complete frame ready for dispatch
    Valid,
    /// Frame discarded
    Invalid,
    /// Deadline passed before the frame completed
    Timeout,
}

/// Wire variant a collector parses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Rtu,
    Tcp,
}

/// Accumulates one response frame on the master side
#[derive(Debug)]
pub struct ResponseCollector {
    format: WireFormat,
    buffer: Vec<u8>,
    state: ReceiveState,
}

impl ResponseCollector {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            buffer: Vec::with_capacity(MAX_RTU_ADU),
            state: ReceiveState::Idle,
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Append received bytes and re-evaluate completeness
    ///
    /// Bytes past the end of a completed frame are dropped. An error means the
    /// buffered bytes can never form a frame and the state is `Invalid`.
    pub fn push(&mut self, bytes: &[u8]) -> Result<ReceiveState, FrameError> {
        if matches!(self.state, ReceiveState::Valid) {
            return Ok(self.state);
        }
        self.state = ReceiveState::Receiving;
        self.buffer.extend_from_slice(bytes);

        match self.required_len() {
            Ok(Some(len)) if self.buffer.len() >= len => {
                self.buffer.truncate(len);
                self.state = ReceiveState::Valid;
            },
            Ok(_) => {},
            Err(e) => {
                self.state = ReceiveState::Invalid;
                return Err(e);
            },
        }
        Ok(self.state)
    }

    fn required_len(&self) -> Result<Option<usize>, FrameError> {
        match self.format {
            WireFormat::Rtu => match expected_len(&self.buffer, FrameKind::Response)? {
                FrameLength::Known(len) if len > MAX_RTU_ADU => Err(FrameError::TooLong(len)),
                FrameLength::Known(len) => Ok(Some(len)),
                FrameLength::Unknown => Ok(None),
            },
            WireFormat::Tcp => {
                if self.buffer.len() < MBAP_HEADER_LEN + 1 {
                    return Ok(None);
                }
                Ok(Some(MbapHeader::parse(&self.buffer)?.frame_len()))
            },
        }
    }

    /// Abort on deadline, discarding the partial frame
    pub fn expire(&mut self) -> ReceiveState {
        if !self.buffer.is_empty() {
            debug!("Discarding {} partial bytes on timeout", self.buffer.len());
        }
        self.buffer.clear();
        self.state = ReceiveState::Timeout;
        self.state
    }

    /// The completed frame bytes
    pub fn frame(&self) -> Option<&[u8]> {
        (self.state == ReceiveState::Valid).then_some(self.buffer.as_slice())
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ReceiveState::Idle;
    }
}

/// Silence-delimited RTU request assembler for the slave side
///
/// Bytes separated by less than the inter-frame delay belong to the same
/// frame. After an overflow, and at start-up, bytes are dropped until a full
/// inter-frame silence has been observed.
#[derive(Debug)]
pub struct RtuFrameAssembler {
    inter_frame_delay: Duration,
    buffer: Vec<u8>,
    last_activity: Instant,
    synced: bool,
    state: ReceiveState,
}

impl RtuFrameAssembler {
    /// The line counts as busy at `now`; one silence must pass before a frame
    /// can start.
    pub fn new(inter_frame_delay: Duration, now: Instant) -> Self {
        Self {
            inter_frame_delay,
            buffer: Vec::with_capacity(MAX_REQUEST_RTU_ADU),
            last_activity: now,
            synced: false,
            state: ReceiveState::Idle,
        }
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Bytes buffered for the frame in progress
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// When the frame in progress closes if no further bytes arrive
    pub fn deadline(&self) -> Option<Instant> {
        (self.state == ReceiveState::Receiving).then(|| self.last_activity + self.inter_frame_delay)
    }

    /// Feed bytes read at `now`
    ///
    /// Returns the frame closed by the silence that preceded these bytes, if
    /// the caller did not poll in time to see it first.
    pub fn push(&mut self, bytes: &[u8], now: Instant) -> Option<Result<Vec<u8>, FrameError>> {
        if bytes.is_empty() {
            return self.poll(now);
        }

        let silent = now.saturating_duration_since(self.last_activity) >= self.inter_frame_delay;
        let closed = if self.state == ReceiveState::Receiving && silent {
            Some(self.close())
        } else {
            None
        };

        if !self.synced {
            if silent {
                self.synced = true;
            } else {
                self.last_activity = now;
                return closed;
            }
        }

        self.last_activity = now;
        if self.buffer.len() + bytes.len() > MAX_REQUEST_RTU_ADU {
            warn!(
                "RTU frame exceeds {} bytes, discarding {} buffered bytes",
                MAX_REQUEST_RTU_ADU,
                self.buffer.len() + bytes.len()
            );
            self.buffer.clear();
            self.synced = false;
            self.state = ReceiveState::Invalid;
            return closed;
        }

        self.buffer.extend_from_slice(bytes);
        self.state = ReceiveState::Receiving;
        closed
    }

    /// Close the frame in progress once the line has been silent long enough
    ///
    /// A closed frame has passed the length and CRC checks; parsing the PDU
    /// is left to the caller so it can still answer frames it cannot model.
    pub fn poll(&mut self, now: Instant) -> Option<Result<Vec<u8>, FrameError>> {
        if self.state != ReceiveState::Receiving {
            if !self.synced
                && now.saturating_duration_since(self.last_activity) >= self.inter_frame_delay
            {
                self.synced = true;
                self.state = ReceiveState::Idle;
            }
            return None;
        }
        if now.saturating_duration_since(self.last_activity) < self.inter_frame_delay {
            return None;
        }
        Some(self.close())
    }

    fn close(&mut self) -> Result<Vec<u8>, FrameError> {
        let frame = std::mem::take(&mut self.buffer);
        match rtu::verify_request(&frame) {
            Ok(()) => {
                debug!("RTU recv: {:02X?}", frame);
                self.state = ReceiveState::Valid;
                Ok(frame)
            },
            Err(e) => {
                warn!("Discarding RTU frame ({} bytes): {}", frame.len(), e);
                self.state = ReceiveState::Invalid;
                Err(e)
            },
        }
    }
}
