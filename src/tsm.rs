//! Transaction state machine for confirmed services.
//!
//! Every outstanding confirmed request owns exactly one slot keyed by its
//! invoke-id. The machine tracks the request's timer and retry budget,
//! matches incoming acknowledgements to slots, and walks the segmentation
//! sub-states when a peer answers with a segmented complex ACK.
//!
//! ```text
//! Idle -> AwaitConfirmation -> (SegmentedRequest | SegmentedConfirmation) -> Idle
//! ```
//!
//! The machine never touches the datalink: retransmissions and timeouts
//! surface as [`TsmEvent`]s the caller executes. Ticks and ACK deliveries
//! are serialised by the owning worker, so no slot is ever advanced from
//! two places at once.

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::time::Duration;

use log::{debug, trace, warn};

use crate::apdu::Apdu;
use crate::network::{Address, NpduData};

/// Result type for transaction operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, TsmError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, TsmError>;

/// Default number of transaction slots (invoke-ids 1..=255; 0 is reserved
/// for unconfirmed bookkeeping).
pub const MAX_TSM_TRANSACTIONS: usize = 255;

/// Errors raised by the transaction layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsmError {
    /// Every invoke-id has an outstanding transaction
    NoFreeInvokeId,
}

impl fmt::Display for TsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TsmError::NoFreeInvokeId => write!(f, "No free invoke id"),
        }
    }
}

#[cfg(feature = "std")]
impl Error for TsmError {}

/// Per-slot state beyond plain await-reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Request sent, waiting for any acknowledgement
    AwaitConfirmation,
    /// Sending a segmented request; `sequence_number` is the next segment
    SegmentedRequest {
        sequence_number: u8,
        actual_window_size: u8,
    },
    /// Receiving a segmented complex ACK
    SegmentedConfirmation { sequence_number: u8 },
}

/// One outstanding confirmed request.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub invoke_id: u8,
    pub state: TransactionState,
    pub dest: Address,
    pub npdu: NpduData,
    /// The encoded APDU, kept verbatim for retransmission
    pub apdu: Vec<u8>,
    pub retry_count: u8,
    timer: Duration,
    /// Reassembled service data across segments
    reassembly: Vec<u8>,
    service_choice: u8,
}

/// Timer and retry actions the caller must execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsmEvent {
    /// Resend the stored APDU to its destination
    Retransmit {
        invoke_id: u8,
        dest: Address,
        npdu: NpduData,
        apdu: Vec<u8>,
    },
    /// Retries exhausted; notify the application exactly once
    TimedOut { invoke_id: u8 },
    /// A segmented exchange stalled; send an Abort to the peer
    Aborted { invoke_id: u8, dest: Address },
}

/// What to do with an acknowledgement that just arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckDisposition {
    /// Terminal outcome; the slot is free again
    Complete,
    /// Final segment arrived; the assembled service data is returned and
    /// the slot is free again
    CompleteSegmented {
        service_choice: u8,
        service_data: Vec<u8>,
    },
    /// Segment accepted; acknowledge it with this segment ACK
    SegmentAckNeeded {
        invoke_id: u8,
        sequence_number: u8,
        actual_window_size: u8,
    },
    /// Out-of-sequence segment; negative-acknowledge with the last good
    /// sequence number
    SegmentNak {
        invoke_id: u8,
        sequence_number: u8,
        actual_window_size: u8,
    },
    /// No slot matches this invoke-id; drop silently
    Unknown,
}

/// The transaction state machine.
#[derive(Debug)]
pub struct Tsm {
    slots: Vec<Transaction>,
    max_transactions: usize,
    next_invoke_id: u8,
    apdu_timeout: Duration,
    apdu_retries: u8,
    segment_timeout: Duration,
    window_size: u8,
}

impl Tsm {
    /// A machine with the given slot budget, request timeout, and retry
    /// count.
    pub fn new(max_transactions: usize, apdu_timeout: Duration, apdu_retries: u8) -> Self {
        Self {
            slots: Vec::new(),
            max_transactions: max_transactions.clamp(1, MAX_TSM_TRANSACTIONS),
            next_invoke_id: 0,
            apdu_timeout,
            apdu_retries,
            segment_timeout: apdu_timeout,
            window_size: 1,
        }
    }

    /// Outstanding transaction count.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Is this invoke-id currently owned by a transaction?
    pub fn is_busy(&self, invoke_id: u8) -> bool {
        self.slots.iter().any(|t| t.invoke_id == invoke_id)
    }

    /// Borrow a transaction for inspection.
    pub fn get(&self, invoke_id: u8) -> Option<&Transaction> {
        self.slots.iter().find(|t| t.invoke_id == invoke_id)
    }

    /// Claim a slot for a confirmed request that was just sent.
    ///
    /// Invoke-ids rotate starting after the last one used, skipping busy
    /// ids, so a reply straggling in after its timeout cannot collide
    /// with a fresh request.
    pub fn allocate(
        &mut self,
        dest: Address,
        npdu: NpduData,
        service_choice: u8,
        apdu: Vec<u8>,
    ) -> Result<u8> {
        if self.slots.len() >= self.max_transactions {
            return Err(TsmError::NoFreeInvokeId);
        }

        let mut candidate = self.next_invoke_id;
        for _ in 0..=u8::MAX {
            candidate = if candidate == u8::MAX { 1 } else { candidate + 1 };
            if !self.is_busy(candidate) {
                self.next_invoke_id = candidate;
                self.slots.push(Transaction {
                    invoke_id: candidate,
                    state: TransactionState::AwaitConfirmation,
                    dest,
                    npdu,
                    apdu,
                    retry_count: 0,
                    timer: self.apdu_timeout,
                    reassembly: Vec::new(),
                    service_choice,
                });
                trace!("tsm: allocated invoke id {}", candidate);
                return Ok(candidate);
            }
        }
        Err(TsmError::NoFreeInvokeId)
    }

    /// Release a slot; idempotent.
    pub fn free(&mut self, invoke_id: u8) {
        self.slots.retain(|t| t.invoke_id != invoke_id);
    }

    /// Store the encoded request for retransmission. The invoke-id is
    /// allocated before the APDU can be encoded, so the two steps are
    /// separate.
    pub fn set_apdu(&mut self, invoke_id: u8, apdu: Vec<u8>) {
        if let Some(slot) = self.slots.iter_mut().find(|t| t.invoke_id == invoke_id) {
            slot.apdu = apdu;
        }
    }

    /// Advance every busy slot's timer by the elapsed interval.
    pub fn on_tick(&mut self, elapsed: Duration) -> Vec<TsmEvent> {
        let mut events = Vec::new();
        let apdu_timeout = self.apdu_timeout;
        let apdu_retries = self.apdu_retries;

        self.slots.retain_mut(|slot| {
            if slot.timer > elapsed {
                slot.timer -= elapsed;
                return true;
            }

            match slot.state {
                TransactionState::AwaitConfirmation => {
                    if slot.retry_count < apdu_retries {
                        slot.retry_count += 1;
                        slot.timer = apdu_timeout;
                        debug!(
                            "tsm: invoke id {} retry {}/{}",
                            slot.invoke_id, slot.retry_count, apdu_retries
                        );
                        events.push(TsmEvent::Retransmit {
                            invoke_id: slot.invoke_id,
                            dest: slot.dest.clone(),
                            npdu: slot.npdu.clone(),
                            apdu: slot.apdu.clone(),
                        });
                        true
                    } else {
                        warn!("tsm: invoke id {} timed out", slot.invoke_id);
                        events.push(TsmEvent::TimedOut {
                            invoke_id: slot.invoke_id,
                        });
                        false
                    }
                }
                TransactionState::SegmentedRequest { .. }
                | TransactionState::SegmentedConfirmation { .. } => {
                    warn!("tsm: invoke id {} segment timeout", slot.invoke_id);
                    events.push(TsmEvent::Aborted {
                        invoke_id: slot.invoke_id,
                        dest: slot.dest.clone(),
                    });
                    false
                }
            }
        });

        events
    }

    /// Match an acknowledgement-class APDU to its transaction.
    pub fn on_ack(&mut self, apdu: &Apdu) -> AckDisposition {
        let invoke_id = match apdu.invoke_id() {
            Some(id) => id,
            None => return AckDisposition::Unknown,
        };
        let index = match self.slots.iter().position(|t| t.invoke_id == invoke_id) {
            Some(index) => index,
            None => return AckDisposition::Unknown,
        };

        match apdu {
            Apdu::SimpleAck { .. } | Apdu::Error { .. } | Apdu::Reject { .. }
            | Apdu::Abort { .. } => {
                self.slots.remove(index);
                AckDisposition::Complete
            }
            Apdu::ComplexAck(ack) if !ack.segmented => {
                self.slots.remove(index);
                AckDisposition::Complete
            }
            Apdu::ComplexAck(ack) => {
                let window_size = self.window_size;
                let segment_timeout = self.segment_timeout;
                let sequence = ack.sequence_number.unwrap_or(0);

                let expected = match self.slots[index].state {
                    TransactionState::AwaitConfirmation => 0,
                    TransactionState::SegmentedConfirmation { sequence_number } => {
                        sequence_number.wrapping_add(1)
                    }
                    TransactionState::SegmentedRequest { .. } => {
                        // A complex ACK while still transmitting segments
                        // is a protocol violation; drop the transaction.
                        self.slots.remove(index);
                        return AckDisposition::Complete;
                    }
                };

                if sequence != expected {
                    let last_good = expected.wrapping_sub(1);
                    return AckDisposition::SegmentNak {
                        invoke_id,
                        sequence_number: last_good,
                        actual_window_size: window_size,
                    };
                }

                let slot = &mut self.slots[index];
                slot.reassembly.extend_from_slice(&ack.service_data);
                slot.service_choice = ack.service_choice;
                slot.timer = segment_timeout;

                if ack.more_follows {
                    slot.state = TransactionState::SegmentedConfirmation {
                        sequence_number: sequence,
                    };
                    AckDisposition::SegmentAckNeeded {
                        invoke_id,
                        sequence_number: sequence,
                        actual_window_size: window_size,
                    }
                } else {
                    let transaction = self.slots.remove(index);
                    AckDisposition::CompleteSegmented {
                        service_choice: transaction.service_choice,
                        service_data: transaction.reassembly,
                    }
                }
            }
            // Segment ACKs for outgoing segmented requests are advanced
            // through `next_request_segment`, not here.
            _ => AckDisposition::Unknown,
        }
    }

    /// Move a slot into the segmented-request state (the request APDU was
    /// too large for one frame and the first segment just went out).
    pub fn start_segmented_request(&mut self, invoke_id: u8, window_size: u8) {
        if let Some(slot) = self.slots.iter_mut().find(|t| t.invoke_id == invoke_id) {
            slot.state = TransactionState::SegmentedRequest {
                sequence_number: 0,
                actual_window_size: window_size,
            };
            slot.timer = self.segment_timeout;
        }
    }

    /// Record that the peer acknowledged segments up to `sequence_number`
    /// and return the next segment number to transmit, or `None` when the
    /// slot is not sending segments.
    pub fn next_request_segment(&mut self, invoke_id: u8, sequence_number: u8) -> Option<u8> {
        let slot = self.slots.iter_mut().find(|t| t.invoke_id == invoke_id)?;
        match slot.state {
            TransactionState::SegmentedRequest {
                actual_window_size, ..
            } => {
                let next = sequence_number.wrapping_add(1);
                slot.state = TransactionState::SegmentedRequest {
                    sequence_number: next,
                    actual_window_size,
                };
                slot.timer = self.segment_timeout;
                Some(next)
            }
            _ => None,
        }
    }
}
