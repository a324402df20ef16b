//! MS/TP master-node state machine (ASHRAE 135 clause 9.5.3).
//!
//! The machine owns no hardware: the port driver forwards validated
//! frames from the receive FSM via [`MasterFsm::on_frame`], reports
//! elapsed bus silence via [`MasterFsm::on_silence`], and executes the
//! [`Action`]s the machine returns (transmit a frame, or hand a payload
//! up to the network layer).
//!
//! Timing model: the driver calls `on_silence` with the real measured
//! interval since the previous call whenever the bus is quiet. All
//! protocol timers derive from those intervals, so the machine works at
//! any polling granularity.
//!
//! Every non-idle state has a timer fallback, so bus silence, CRC noise,
//! and framing aborts can delay the ring but never deadlock it.

#[cfg(not(feature = "std"))]
use alloc::{collections::VecDeque, vec::Vec};

#[cfg(feature = "std")]
use std::collections::VecDeque;

use bytes::Bytes;
use core::time::Duration;

use log::{debug, trace};

use super::{
    Frame, FrameType, MAX_MASTER, MSTP_BROADCAST, N_MAX_INFO_FRAMES, N_POLL, N_RETRY_TOKEN,
    T_NO_TOKEN, T_REPLY_DELAY, T_REPLY_TIMEOUT, T_SLOT, T_USAGE_TIMEOUT,
};

/// Master-node port configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MstpConfig {
    /// Our station address (0..=127 for a master)
    pub this_station: u8,
    /// Highest master address ever polled for
    pub max_master: u8,
    /// Data frames we may send per token tenure
    pub max_info_frames: u8,
    /// Line rate in bit/s; carried for the port driver, not used by the
    /// state machine itself
    pub baud: u32,
}

impl Default for MstpConfig {
    fn default() -> Self {
        Self {
            this_station: 1,
            max_master: MAX_MASTER,
            max_info_frames: N_MAX_INFO_FRAMES,
            baud: 38_400,
        }
    }
}

/// Observable machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Initialize,
    Idle,
    UseToken,
    WaitForReply,
    DoneWithToken,
    PassToken,
    NoToken,
    PollForMaster,
    AnswerDataRequest,
}

/// An outbound NPDU waiting for token tenure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    pub destination: u8,
    pub expecting_reply: bool,
    pub data: Bytes,
}

/// What the port driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Transmit this frame on the wire
    SendFrame(Frame),
    /// Deliver this frame's payload to the network layer
    Indicate(Frame),
}

/// Why a poll-for-master sweep is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollContext {
    /// Claiming a lost token: sweep until someone answers or we wrap
    Claim,
    /// Periodic single probe to admit new masters to the ring
    Maintenance,
}

/// Transmit-queue depth; senders see backpressure beyond this.
const TX_QUEUE_LIMIT: usize = 16;

/// The clause 9.5.3 master node.
#[derive(Debug)]
pub struct MasterFsm {
    config: MstpConfig,
    state: MasterState,
    /// We currently hold the token
    have_token: bool,
    next_station: u8,
    poll_station: u8,
    poll_context: PollContext,
    token_count: u8,
    frame_count: u8,
    retry_count: u8,
    sole_master: bool,
    /// Time since the last octet or frame on the bus
    silence: Duration,
    /// Per-state timer, reset on every transition
    timer: Duration,
    tx_queue: VecDeque<PendingTx>,
    /// Station owed a reply while in AnswerDataRequest
    reply_to: Option<u8>,
    /// Reply payload supplied by the application
    reply: Option<PendingTx>,
}

impl MasterFsm {
    pub fn new(mut config: MstpConfig) -> Self {
        // Master addresses are 7-bit; clamping keeps the modulus
        // arithmetic of the poll sweep in range.
        config.this_station = config.this_station.min(MAX_MASTER);
        config.max_master = config.max_master.min(MAX_MASTER);
        let this_station = config.this_station;
        Self {
            config,
            state: MasterState::Initialize,
            have_token: false,
            next_station: this_station,
            poll_station: this_station,
            poll_context: PollContext::Claim,
            token_count: 0,
            frame_count: 0,
            retry_count: 0,
            sole_master: false,
            silence: Duration::ZERO,
            timer: Duration::ZERO,
            tx_queue: VecDeque::new(),
            reply_to: None,
            reply: None,
        }
    }

    /// Current state, for diagnostics and tests.
    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Latched when a full poll sweep found no other master.
    pub fn is_sole_master(&self) -> bool {
        self.sole_master
    }

    /// The station we pass the token to.
    pub fn next_station(&self) -> u8 {
        self.next_station
    }

    /// Queue an NPDU for transmission under a future token tenure.
    /// Returns false when the queue is full.
    pub fn enqueue(&mut self, tx: PendingTx) -> bool {
        if self.tx_queue.len() >= TX_QUEUE_LIMIT {
            return false;
        }
        self.tx_queue.push_back(tx);
        true
    }

    /// The station we owe a reply, while in AnswerDataRequest.
    pub fn reply_owed_to(&self) -> Option<u8> {
        self.reply_to
    }

    /// Provide the reply for the data-expecting-reply frame being
    /// answered. Returns the transmit action when the machine was
    /// actually waiting for one.
    pub fn supply_reply(&mut self, data: Bytes) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == MasterState::AnswerDataRequest {
            if let Some(destination) = self.reply_to {
                self.reply = Some(PendingTx {
                    destination,
                    expecting_reply: false,
                    data,
                });
                self.flush_reply(&mut actions);
            }
        }
        actions
    }

    /// Report elapsed bus silence and run every timer that fires.
    pub fn on_silence(&mut self, elapsed: Duration) -> Vec<Action> {
        let mut actions = Vec::new();
        self.silence += elapsed;
        self.timer += elapsed;

        match self.state {
            MasterState::Initialize => {
                self.next_station = self.config.this_station;
                self.poll_station = self.config.this_station;
                self.token_count = 0;
                self.sole_master = false;
                self.enter(MasterState::Idle);
            }
            MasterState::Idle => {
                if self.have_token {
                    // Sole-master cycle: one token tenure per poll call
                    self.frame_count = 0;
                    self.enter(MasterState::UseToken);
                    self.run_use_token(&mut actions);
                } else if self.silence >= T_NO_TOKEN {
                    debug!("mstp master {}: token lost", self.config.this_station);
                    self.enter(MasterState::NoToken);
                }
            }
            MasterState::NoToken => {
                let claim_at =
                    T_NO_TOKEN + T_SLOT * u32::from(self.config.this_station);
                if self.silence >= claim_at {
                    self.start_poll_sweep(PollContext::Claim, &mut actions);
                }
            }
            MasterState::PollForMaster => {
                if self.timer >= T_USAGE_TIMEOUT {
                    self.poll_station_timeout(&mut actions);
                }
            }
            MasterState::WaitForReply => {
                if self.timer >= T_REPLY_TIMEOUT {
                    // The reply was lost; the sender's transaction layer
                    // will retry end to end.
                    trace!("mstp master: reply timeout");
                    self.run_done_with_token(&mut actions);
                }
            }
            MasterState::PassToken => {
                if self.timer >= T_USAGE_TIMEOUT {
                    if self.retry_count < N_RETRY_TOKEN {
                        self.retry_count += 1;
                        self.timer = Duration::ZERO;
                        actions.push(Action::SendFrame(Frame::token(
                            self.next_station,
                            self.config.this_station,
                        )));
                    } else {
                        // Successor is gone; hunt for a new one
                        self.start_poll_sweep_from(
                            self.next_station.wrapping_add(1) % (self.config.max_master + 1),
                            PollContext::Claim,
                            &mut actions,
                        );
                    }
                }
            }
            MasterState::AnswerDataRequest => {
                if self.timer >= T_REPLY_DELAY {
                    if let Some(destination) = self.reply_to.take() {
                        actions.push(Action::SendFrame(Frame::reply_postponed(
                            destination,
                            self.config.this_station,
                        )));
                    }
                    self.enter(MasterState::Idle);
                }
            }
            MasterState::UseToken | MasterState::DoneWithToken => {
                // Transient states; nothing to time out
            }
        }

        actions
    }

    /// Process one validated frame from the receive FSM.
    pub fn on_frame(&mut self, frame: &Frame) -> Vec<Action> {
        let mut actions = Vec::new();
        self.silence = Duration::ZERO;
        let ts = self.config.this_station;

        // Another master answering polls means we are not alone.
        if frame.frame_type == FrameType::ReplyToPollForMaster && frame.source != ts {
            self.sole_master = false;
        }

        match self.state {
            MasterState::Initialize => {
                self.enter(MasterState::Idle);
                self.handle_frame_idle(frame, &mut actions);
            }
            MasterState::Idle | MasterState::NoToken => {
                if self.state == MasterState::NoToken {
                    // Bus is alive after all
                    self.enter(MasterState::Idle);
                }
                self.handle_frame_idle(frame, &mut actions);
            }
            MasterState::PassToken => {
                // Any activity proves the successor took the token
                self.have_token = false;
                self.enter(MasterState::Idle);
                self.handle_frame_idle(frame, &mut actions);
            }
            MasterState::WaitForReply => {
                if frame.destination == ts {
                    match frame.frame_type {
                        FrameType::BacnetDataNotExpectingReply | FrameType::TestResponse => {
                            actions.push(Action::Indicate(frame.clone()));
                            self.enter(MasterState::UseToken);
                            self.run_use_token(&mut actions);
                        }
                        FrameType::ReplyPostponed => {
                            self.run_done_with_token(&mut actions);
                        }
                        _ => {
                            // Unexpected traffic; abandon the tenure
                            self.have_token = false;
                            self.enter(MasterState::Idle);
                            self.handle_frame_idle(frame, &mut actions);
                        }
                    }
                }
                // Frames for other stations while waiting are ignored
            }
            MasterState::PollForMaster => {
                if frame.frame_type == FrameType::ReplyToPollForMaster
                    && frame.destination == ts
                {
                    debug!(
                        "mstp master {}: successor {} found",
                        ts, frame.source
                    );
                    self.next_station = frame.source;
                    self.sole_master = false;
                    self.token_count = 0;
                    self.have_token = false;
                    self.retry_count = 0;
                    actions.push(Action::SendFrame(Frame::token(frame.source, ts)));
                    self.enter(MasterState::PassToken);
                } else {
                    // Real traffic ends the sweep
                    self.enter(MasterState::Idle);
                    self.handle_frame_idle(frame, &mut actions);
                }
            }
            MasterState::AnswerDataRequest => {
                // A frame arriving while we owe a reply is unexpected;
                // drop back to Idle and handle it there.
                self.reply_to = None;
                self.reply = None;
                self.enter(MasterState::Idle);
                self.handle_frame_idle(frame, &mut actions);
            }
            MasterState::UseToken | MasterState::DoneWithToken => {
                self.handle_frame_idle(frame, &mut actions);
            }
        }

        actions
    }

    fn handle_frame_idle(&mut self, frame: &Frame, actions: &mut Vec<Action>) {
        let ts = self.config.this_station;
        match frame.frame_type {
            FrameType::Token => {
                // A broadcast token is illegal and ignored
                if frame.destination == ts {
                    self.have_token = true;
                    self.frame_count = 0;
                    self.enter(MasterState::UseToken);
                    self.run_use_token(actions);
                }
            }
            FrameType::PollForMaster => {
                if frame.destination == ts {
                    actions.push(Action::SendFrame(Frame::reply_to_poll_for_master(
                        frame.source,
                        ts,
                    )));
                }
            }
            FrameType::BacnetDataExpectingReply => {
                if frame.destination == ts {
                    self.reply_to = Some(frame.source);
                    self.reply = None;
                    self.enter(MasterState::AnswerDataRequest);
                    actions.push(Action::Indicate(frame.clone()));
                } else if frame.destination == MSTP_BROADCAST {
                    // Broadcast data-expecting-reply is never answered
                    actions.push(Action::Indicate(frame.clone()));
                }
            }
            FrameType::TestRequest => {
                if frame.destination == ts {
                    // Loopback: echo the payload straight back
                    self.reply_to = Some(frame.source);
                    self.enter(MasterState::AnswerDataRequest);
                    actions.push(Action::SendFrame(Frame {
                        frame_type: FrameType::TestResponse,
                        destination: frame.source,
                        source: ts,
                        data: frame.data.clone(),
                    }));
                    self.reply_to = None;
                    self.enter(MasterState::Idle);
                }
            }
            FrameType::BacnetDataNotExpectingReply => {
                if frame.is_for(ts) {
                    actions.push(Action::Indicate(frame.clone()));
                }
            }
            FrameType::TestResponse
            | FrameType::ReplyToPollForMaster
            | FrameType::ReplyPostponed => {
                // Not meaningful outside their request contexts
            }
            FrameType::Custom(_) | FrameType::Reserved(_) => {
                // Proprietary frames pass through to the application
                if frame.is_for(ts) {
                    actions.push(Action::Indicate(frame.clone()));
                }
            }
        }
    }

    fn run_use_token(&mut self, actions: &mut Vec<Action>) {
        let ts = self.config.this_station;
        while self.frame_count < self.config.max_info_frames {
            let tx = match self.tx_queue.pop_front() {
                Some(tx) => tx,
                None => break,
            };
            let expecting = tx.expecting_reply && tx.destination != MSTP_BROADCAST;
            match Frame::bacnet_data(tx.destination, ts, tx.data, expecting) {
                Some(frame) => {
                    actions.push(Action::SendFrame(frame));
                    self.frame_count += 1;
                    if expecting {
                        self.enter(MasterState::WaitForReply);
                        return;
                    }
                }
                None => {
                    debug!("mstp master: dropping oversized tx");
                }
            }
        }
        self.run_done_with_token(actions);
    }

    fn run_done_with_token(&mut self, actions: &mut Vec<Action>) {
        self.state = MasterState::DoneWithToken;
        self.token_count = self.token_count.saturating_add(1);

        if self.token_count >= N_POLL {
            self.token_count = 0;
            self.start_maintenance_poll(actions);
            return;
        }

        if self.next_station == self.config.this_station {
            if self.sole_master {
                // Nobody to pass to; keep the token and cycle through Idle
                self.have_token = true;
                self.enter(MasterState::Idle);
            } else {
                // Successor unknown; sweep for one (or become sole master)
                self.start_poll_sweep(PollContext::Claim, actions);
            }
            return;
        }

        self.pass_token(actions);
    }

    fn pass_token(&mut self, actions: &mut Vec<Action>) {
        self.have_token = false;
        self.retry_count = 0;
        actions.push(Action::SendFrame(Frame::token(
            self.next_station,
            self.config.this_station,
        )));
        self.enter(MasterState::PassToken);
    }

    fn start_poll_sweep(&mut self, context: PollContext, actions: &mut Vec<Action>) {
        let start =
            self.config.this_station.wrapping_add(1) % (self.config.max_master + 1);
        self.start_poll_sweep_from(start, context, actions);
    }

    fn start_poll_sweep_from(
        &mut self,
        start: u8,
        context: PollContext,
        actions: &mut Vec<Action>,
    ) {
        self.poll_context = context;
        self.poll_station = start;
        if self.poll_station == self.config.this_station {
            // Nothing to poll (max_master == this_station == 0)
            self.claim_sole_master(actions);
            return;
        }
        actions.push(Action::SendFrame(Frame::poll_for_master(
            self.poll_station,
            self.config.this_station,
        )));
        self.enter(MasterState::PollForMaster);
    }

    fn start_maintenance_poll(&mut self, actions: &mut Vec<Action>) {
        let modulus = self.config.max_master + 1;
        let mut candidate = self.poll_station.wrapping_add(1) % modulus;
        if candidate == self.config.this_station {
            candidate = candidate.wrapping_add(1) % modulus;
        }
        if candidate == self.config.this_station {
            // max_master admits no other station
            self.finish_maintenance_poll(actions);
            return;
        }
        self.poll_context = PollContext::Maintenance;
        self.poll_station = candidate;
        actions.push(Action::SendFrame(Frame::poll_for_master(
            candidate,
            self.config.this_station,
        )));
        self.enter(MasterState::PollForMaster);
    }

    fn poll_station_timeout(&mut self, actions: &mut Vec<Action>) {
        match self.poll_context {
            PollContext::Maintenance => self.finish_maintenance_poll(actions),
            PollContext::Claim => {
                let modulus = self.config.max_master + 1;
                self.poll_station = self.poll_station.wrapping_add(1) % modulus;
                if self.poll_station == self.config.this_station {
                    // Full sweep, no answer: the ring is ours
                    self.claim_sole_master(actions);
                } else {
                    self.timer = Duration::ZERO;
                    actions.push(Action::SendFrame(Frame::poll_for_master(
                        self.poll_station,
                        self.config.this_station,
                    )));
                }
            }
        }
    }

    fn finish_maintenance_poll(&mut self, actions: &mut Vec<Action>) {
        if self.next_station == self.config.this_station {
            // Still nobody else on the ring
            self.sole_master = true;
            self.have_token = true;
            self.enter(MasterState::Idle);
        } else {
            self.pass_token(actions);
        }
    }

    fn claim_sole_master(&mut self, actions: &mut Vec<Action>) {
        debug!(
            "mstp master {}: sole master on the ring",
            self.config.this_station
        );
        self.sole_master = true;
        self.next_station = self.config.this_station;
        self.have_token = true;
        self.frame_count = 0;
        self.enter(MasterState::UseToken);
        self.run_use_token(actions);
    }

    fn flush_reply(&mut self, actions: &mut Vec<Action>) {
        if let (Some(destination), Some(reply)) = (self.reply_to.take(), self.reply.take()) {
            if let Some(frame) = Frame::bacnet_data(
                destination,
                self.config.this_station,
                reply.data,
                false,
            ) {
                actions.push(Action::SendFrame(frame));
            }
        }
        self.enter(MasterState::Idle);
    }

    fn enter(&mut self, state: MasterState) {
        trace!("mstp master: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.timer = Duration::ZERO;
    }
}
