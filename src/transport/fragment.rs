//! Report frame fragmentation for notifications.
//!
//! A notification carries at most `ATT_MTU - 3` bytes. Report frames can be
//! longer (up to [`super::frame::MAX_REPORT_LEN`]), so every report is sent
//! as one or more fragments:
//!
//! ```text
//! [sequence: 1 byte][flags: 1 byte][payload: N bytes]
//! ```
//!
//! Flags:
//! - Bit 0: FIRST - first fragment of a report
//! - Bit 1: MORE - more fragments of the same report follow
//!
//! A report that fits in one notification is still a single fragment with
//! only FIRST set, so the peer always reads the same header.

use super::TransportError;

/// Header size in bytes (sequence + flags).
pub const HEADER_SIZE: usize = 2;

/// ATT bytes not available to a notification payload (opcode + handle).
pub const ATT_NOTIFY_OVERHEAD: usize = 3;

/// ATT MTU every BLE link starts with.
pub const DEFAULT_ATT_MTU: u16 = 23;

pub const FLAG_FIRST: u8 = 0x01;
pub const FLAG_MORE: u8 = 0x02;

/// Splits report frames into notification-sized fragments.
#[derive(Debug)]
pub struct Fragmenter {
    /// Largest notification payload, header included.
    max_len: usize,
    next_sequence: u8,
}

impl Fragmenter {
    /// Fragmenter for notifications of at most `max_len` bytes.
    pub fn new(max_len: usize) -> Result<Self, TransportError> {
        if max_len <= HEADER_SIZE {
            return Err(TransportError::Malformed(format!(
                "notification size {} leaves no room for payload",
                max_len
            )));
        }
        Ok(Self {
            max_len,
            next_sequence: 0,
        })
    }

    /// Fragmenter sized for a link with the given ATT MTU.
    pub fn for_att_mtu(mtu: u16) -> Result<Self, TransportError> {
        Self::new(usize::from(mtu).saturating_sub(ATT_NOTIFY_OVERHEAD))
    }

    pub fn max_payload(&self) -> usize {
        self.max_len - HEADER_SIZE
    }

    /// Resize for a renegotiated MTU. The sequence keeps counting.
    pub fn set_att_mtu(&mut self, mtu: u16) -> Result<(), TransportError> {
        let resized = Self::for_att_mtu(mtu)?;
        self.max_len = resized.max_len;
        Ok(())
    }

    /// Split one report frame. Each returned buffer is one notification.
    pub fn fragment(&mut self, frame: &[u8]) -> Vec<Vec<u8>> {
        let max_payload = self.max_payload();
        let mut fragments = Vec::with_capacity(frame.len().div_ceil(max_payload).max(1));
        let mut chunks = frame.chunks(max_payload).peekable();
        let mut flags = FLAG_FIRST;

        // An empty frame still produces one (header-only) fragment.
        if chunks.peek().is_none() {
            fragments.push(vec![self.next_sequence(), flags]);
            return fragments;
        }

        while let Some(chunk) = chunks.next() {
            if chunks.peek().is_some() {
                flags |= FLAG_MORE;
            }
            let mut fragment = Vec::with_capacity(HEADER_SIZE + chunk.len());
            fragment.push(self.next_sequence());
            fragment.push(flags);
            fragment.extend_from_slice(chunk);
            fragments.push(fragment);
            flags = 0;
        }
        fragments
    }

    fn next_sequence(&mut self) -> u8 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }
}
