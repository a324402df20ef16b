//! The protocol engine: one value owning the transaction state machine,
//! the address cache, the dispatcher, and the counters, wired into the
//! stack's receive and send paths.
//!
//! Receive path: `process_pdu` decodes the NPDU, applies the (non-router)
//! routing policy, decodes the APDU, correlates acknowledgement-class
//! PDUs through the TSM, and dispatches request-class PDUs to handlers,
//! sending any synchronous reply on the same datalink the request came
//! from. Send path: `send_confirmed` allocates a TSM slot, encodes the
//! request, and arms the retry timer; `tick` advances every timer with
//! real elapsed time.
//!
//! The engine is built for a single cooperative worker: nothing blocks,
//! and the only suspension point is the datalink `receive` the caller
//! polls.

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use core::time::Duration;

use log::{debug, trace, warn};

use crate::address::{AddressCache, BindError};
use crate::apdu::{
    Apdu, AbortReason, ComplexAck, ConfirmedRequest, ErrorClassCode, MaxApduSize, MaxSegments,
    RejectReason, Segmentation,
};
use crate::datalink::DataLink;
use crate::dispatch::{ConfirmedServiceData, Dispatcher, HandlerOutcome};
use crate::encoding::{skip_value, CodecError};
use crate::mstp::MstpConfig;
use crate::network::{Address, NetworkError, NetworkMessageType, Npdu, NpduData};
use crate::service::unconfirmed::{IAmRequest, WhoIsRequest};
use crate::service::{ConfirmedServiceChoice, UnconfirmedServiceChoice};
use crate::tsm::{AckDisposition, Tsm, TsmError, TsmEvent};

/// Result type for stack operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, StackError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, StackError>;

/// Errors surfaced by the engine's send paths and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    Codec(CodecError),
    Network(NetworkError),
    Transaction(TsmError),
    Bind(BindError),
    Link(crate::datalink::DataLinkError),
    /// A configuration field is outside its legal range
    InvalidConfig,
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::Codec(e) => write!(f, "Codec error: {}", e),
            StackError::Network(e) => write!(f, "Network error: {}", e),
            StackError::Transaction(e) => write!(f, "Transaction error: {}", e),
            StackError::Bind(e) => write!(f, "Address binding error: {}", e),
            StackError::Link(e) => write!(f, "Datalink error: {}", e),
            StackError::InvalidConfig => write!(f, "Invalid device configuration"),
        }
    }
}

#[cfg(feature = "std")]
impl Error for StackError {}

impl From<CodecError> for StackError {
    fn from(e: CodecError) -> Self {
        StackError::Codec(e)
    }
}

impl From<NetworkError> for StackError {
    fn from(e: NetworkError) -> Self {
        StackError::Network(e)
    }
}

impl From<TsmError> for StackError {
    fn from(e: TsmError) -> Self {
        StackError::Transaction(e)
    }
}

impl From<BindError> for StackError {
    fn from(e: BindError) -> Self {
        StackError::Bind(e)
    }
}

impl From<crate::datalink::DataLinkError> for StackError {
    fn from(e: crate::datalink::DataLinkError) -> Self {
        StackError::Link(e)
    }
}

/// APDU sizes a device may advertise.
const LEGAL_MAX_APDU: [u16; 6] = [50, 128, 206, 480, 1024, 1476];

/// Device-level configuration, applied at engine construction.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_instance: u32,
    pub vendor_id: u16,
    /// One of 50, 128, 206, 480, 1024, 1476
    pub max_apdu: u16,
    pub apdu_timeout: Duration,
    pub apdu_retries: u8,
    /// 1..=255 transaction slots
    pub max_tsm_transactions: u8,
    pub max_address_cache: usize,
    pub segmentation: Segmentation,
    /// Present when the device sits on an MS/TP port
    pub mstp: Option<MstpConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_instance: 260,
            vendor_id: 260,
            max_apdu: 1476,
            apdu_timeout: Duration::from_millis(3000),
            apdu_retries: 3,
            max_tsm_transactions: 255,
            max_address_cache: crate::address::MAX_ADDRESS_CACHE,
            segmentation: Segmentation::None,
            mstp: None,
        }
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<()> {
        if !LEGAL_MAX_APDU.contains(&self.max_apdu)
            || self.max_tsm_transactions == 0
            || self.device_instance > crate::encoding::MAX_INSTANCE
        {
            return Err(StackError::InvalidConfig);
        }
        if let Some(mstp) = &self.mstp {
            if mstp.this_station > crate::mstp::MAX_MASTER
                || mstp.max_master > crate::mstp::MAX_MASTER
                || mstp.max_info_frames == 0
            {
                return Err(StackError::InvalidConfig);
            }
        }
        Ok(())
    }
}

/// Monotonic diagnostic counters. Malformed input increments exactly one
/// counter per category and never produces a callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackCounters {
    /// NPDUs addressed to a foreign network (we are not a router)
    pub npdu_not_for_us: u64,
    pub npdu_decode_errors: u64,
    pub apdu_decode_errors: u64,
    /// Acknowledgements with no matching transaction
    pub apdu_unexpected: u64,
    pub network_messages: u64,
    pub confirmed_requests: u64,
    pub unconfirmed_requests: u64,
    pub rejects_sent: u64,
    pub timeouts: u64,
}

/// Terminal outcome of a confirmed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmedOutcome {
    SimpleAck {
        service_choice: u8,
    },
    ComplexAck {
        service_choice: u8,
        service_data: Vec<u8>,
    },
    /// Service-level error; [`ErrorClassCode::decode`] parses the common
    /// body shape
    Error {
        service_choice: u8,
        error_data: Vec<u8>,
    },
    Reject(RejectReason),
    Abort(AbortReason),
    /// Retries exhausted with no answer; delivered exactly once
    Timeout,
}

/// What the engine tells the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// A confirmed request reached a terminal state
    Confirmed {
        invoke_id: u8,
        outcome: ConfirmedOutcome,
    },
    /// An I-Am arrived and refreshed the address cache
    IAmReceived { request: IAmRequest, src: Address },
}

/// Handler for network-layer messages (the core itself never routes).
pub type NetworkHandler = Box<dyn FnMut(NetworkMessageType, &[u8], &Address) + Send>;

/// The engine.
pub struct Stack {
    config: DeviceConfig,
    tsm: Tsm,
    cache: AddressCache,
    dispatcher: Dispatcher,
    counters: StackCounters,
    network_handler: Option<NetworkHandler>,
    /// True once discovery has started; lets unsolicited I-Am
    /// announcements populate the cache
    discovering: bool,
    /// Sub-second remainder for cache ageing
    age_remainder: Duration,
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish()
    }
}

impl Stack {
    /// Build an engine from a validated configuration.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let tsm = Tsm::new(
            usize::from(config.max_tsm_transactions),
            config.apdu_timeout,
            config.apdu_retries,
        );
        let cache = AddressCache::new(config.max_address_cache);
        Ok(Self {
            config,
            tsm,
            cache,
            dispatcher: Dispatcher::new(),
            counters: StackCounters::default(),
            network_handler: None,
            discovering: false,
            age_remainder: Duration::ZERO,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn counters(&self) -> StackCounters {
        self.counters
    }

    /// Handler tables, for startup registration.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// The address cache, for diagnostics and static bindings.
    pub fn address_cache_mut(&mut self) -> &mut AddressCache {
        &mut self.cache
    }

    /// Install the network-layer message handler.
    pub fn set_network_handler(&mut self, handler: NetworkHandler) {
        self.network_handler = Some(handler);
    }

    /// Outstanding confirmed transactions.
    pub fn pending_transactions(&self) -> usize {
        self.tsm.count()
    }

    /// Process one received PDU (NPDU header plus APDU), returning the
    /// application-visible events it produced.
    pub fn process_pdu(
        &mut self,
        link: &mut dyn DataLink,
        src: &Address,
        pdu: &[u8],
    ) -> Vec<StackEvent> {
        let (npdu, offset) = match Npdu::decode(pdu) {
            Ok(decoded) => decoded,
            Err(error) => {
                debug!("npdu decode failed: {}", error);
                self.counters.npdu_decode_errors += 1;
                return Vec::new();
            }
        };

        if !npdu.is_for_local_delivery() {
            trace!("discarding npdu for foreign network");
            self.counters.npdu_not_for_us += 1;
            return Vec::new();
        }

        if let Some(message_type) = npdu.data.message_type {
            self.counters.network_messages += 1;
            if let Some(handler) = self.network_handler.as_mut() {
                handler(message_type, &pdu[offset..], src);
            }
            return Vec::new();
        }

        let reply_to = reply_address(&npdu, src);
        self.process_apdu(link, &npdu.data, &reply_to, &pdu[offset..])
    }

    fn process_apdu(
        &mut self,
        link: &mut dyn DataLink,
        npdu: &NpduData,
        src: &Address,
        apdu: &[u8],
    ) -> Vec<StackEvent> {
        let mut events = Vec::new();

        let decoded = match Apdu::decode(apdu) {
            Ok(decoded) => decoded,
            Err(error) => {
                debug!("apdu decode failed: {}", error);
                self.counters.apdu_decode_errors += 1;
                return events;
            }
        };

        match decoded {
            Apdu::ConfirmedRequest(request) => {
                self.counters.confirmed_requests += 1;
                self.handle_confirmed_request(link, npdu, src, request);
            }
            Apdu::UnconfirmedRequest {
                service_choice,
                service_data,
            } => {
                self.counters.unconfirmed_requests += 1;
                self.handle_unconfirmed_request(
                    link,
                    npdu,
                    src,
                    service_choice,
                    &service_data,
                    &mut events,
                );
            }
            ack => self.handle_ack(link, src, ack, &mut events),
        }

        events
    }

    fn handle_confirmed_request(
        &mut self,
        link: &mut dyn DataLink,
        npdu: &NpduData,
        src: &Address,
        request: ConfirmedRequest,
    ) {
        if request.segmented {
            // Receive-direction segmentation is not supported; tell the
            // client immediately rather than letting it time out.
            self.send_abort(link, src, request.invoke_id, AbortReason::SegmentationNotSupported);
            return;
        }

        // A service body whose tags announce more octets than arrived is
        // rejected here, before any handler runs.
        if let Err(error) = validate_tlv(&request.service_data) {
            debug!("confirmed request body invalid: {}", error);
            self.counters.apdu_decode_errors += 1;
            let reason = match error {
                CodecError::InvalidTag => RejectReason::InvalidTag,
                _ => RejectReason::MissingRequiredParameter,
            };
            self.send_reject(link, src, request.invoke_id, reason);
            return;
        }

        let service_data = ConfirmedServiceData {
            invoke_id: request.invoke_id,
            max_segments: request.max_segments,
            max_apdu: request.max_apdu,
            segmented_response_accepted: request.segmented_response_accepted,
        };
        let outcome = self.dispatcher.dispatch_confirmed(
            request.service_choice,
            &request.service_data,
            npdu,
            src,
            &service_data,
        );

        match outcome {
            HandlerOutcome::SimpleAck => {
                self.send_apdu(
                    link,
                    src,
                    false,
                    &Apdu::SimpleAck {
                        invoke_id: request.invoke_id,
                        service_choice: request.service_choice,
                    },
                );
            }
            HandlerOutcome::ComplexAck(payload) => {
                self.send_apdu(
                    link,
                    src,
                    false,
                    &Apdu::ComplexAck(ComplexAck::new(
                        request.invoke_id,
                        request.service_choice,
                        payload,
                    )),
                );
            }
            HandlerOutcome::ServiceError(error) => {
                let mut error_data = Vec::new();
                error.encode(&mut error_data);
                self.send_apdu(
                    link,
                    src,
                    false,
                    &Apdu::Error {
                        invoke_id: request.invoke_id,
                        service_choice: request.service_choice,
                        error_data,
                    },
                );
            }
            HandlerOutcome::Reject(reason) => {
                self.send_reject(link, src, request.invoke_id, reason);
            }
            HandlerOutcome::ReplyPostponed => {
                trace!(
                    "reply postponed for invoke id {}",
                    request.invoke_id
                );
            }
        }
    }

    fn handle_unconfirmed_request(
        &mut self,
        link: &mut dyn DataLink,
        npdu: &NpduData,
        src: &Address,
        service_choice: u8,
        service_data: &[u8],
        events: &mut Vec<StackEvent>,
    ) {
        match UnconfirmedServiceChoice::try_from(service_choice) {
            Ok(UnconfirmedServiceChoice::IAm) => match IAmRequest::decode(service_data) {
                Ok(request) => {
                    self.observe_i_am(&request, src);
                    events.push(StackEvent::IAmReceived {
                        request,
                        src: src.clone(),
                    });
                }
                Err(_) => {
                    self.counters.apdu_decode_errors += 1;
                    return;
                }
            },
            Ok(UnconfirmedServiceChoice::WhoIs) => match WhoIsRequest::decode(service_data) {
                Ok(request) => {
                    if request.matches(self.config.device_instance) {
                        let _ = self.i_am(link);
                    }
                }
                Err(_) => {
                    self.counters.apdu_decode_errors += 1;
                    return;
                }
            },
            _ => {}
        }

        self.dispatcher
            .dispatch_unconfirmed(service_choice, service_data, npdu, src);
    }

    fn handle_ack(
        &mut self,
        link: &mut dyn DataLink,
        src: &Address,
        ack: Apdu,
        events: &mut Vec<StackEvent>,
    ) {
        let invoke_id = ack.invoke_id().unwrap_or(0);

        if let Apdu::SegmentAck {
            sequence_number, ..
        } = ack
        {
            // Window bookkeeping for outgoing segmented requests
            let _ = self.tsm.next_request_segment(invoke_id, sequence_number);
            return;
        }

        match self.tsm.on_ack(&ack) {
            AckDisposition::Complete => {
                let outcome = match ack {
                    Apdu::SimpleAck { service_choice, .. } => ConfirmedOutcome::SimpleAck {
                        service_choice,
                    },
                    Apdu::ComplexAck(ack) => ConfirmedOutcome::ComplexAck {
                        service_choice: ack.service_choice,
                        service_data: ack.service_data,
                    },
                    Apdu::Error {
                        service_choice,
                        error_data,
                        ..
                    } => ConfirmedOutcome::Error {
                        service_choice,
                        error_data,
                    },
                    Apdu::Reject { reason, .. } => ConfirmedOutcome::Reject(reason),
                    Apdu::Abort { reason, .. } => ConfirmedOutcome::Abort(reason),
                    _ => return,
                };
                events.push(StackEvent::Confirmed { invoke_id, outcome });
            }
            AckDisposition::CompleteSegmented {
                service_choice,
                service_data,
            } => {
                events.push(StackEvent::Confirmed {
                    invoke_id,
                    outcome: ConfirmedOutcome::ComplexAck {
                        service_choice,
                        service_data,
                    },
                });
            }
            AckDisposition::SegmentAckNeeded {
                invoke_id,
                sequence_number,
                actual_window_size,
            } => {
                self.send_apdu(
                    link,
                    src,
                    false,
                    &Apdu::SegmentAck {
                        negative_ack: false,
                        server: false,
                        invoke_id,
                        sequence_number,
                        actual_window_size,
                    },
                );
            }
            AckDisposition::SegmentNak {
                invoke_id,
                sequence_number,
                actual_window_size,
            } => {
                self.send_apdu(
                    link,
                    src,
                    false,
                    &Apdu::SegmentAck {
                        negative_ack: true,
                        server: false,
                        invoke_id,
                        sequence_number,
                        actual_window_size,
                    },
                );
            }
            AckDisposition::Unknown => {
                trace!("ack for unknown invoke id {}", invoke_id);
                self.counters.apdu_unexpected += 1;
            }
        }
    }

    fn observe_i_am(&mut self, request: &IAmRequest, src: &Address) {
        let device_id = request.device_id.instance;
        let known = self.cache.get(device_id).is_some() || self.cache.is_requested(device_id);
        if known || self.discovering {
            if self.cache.add(device_id, request.max_apdu, src.clone()).is_err() {
                warn!("address cache full; dropping binding for {}", device_id);
            }
        }
    }

    /// Advance every timer by the real elapsed interval: TSM retries and
    /// timeouts, address-cache ageing, and queued Who-Is transmissions.
    pub fn tick(&mut self, link: &mut dyn DataLink, elapsed: Duration) -> Vec<StackEvent> {
        let mut events = Vec::new();

        for event in self.tsm.on_tick(elapsed) {
            match event {
                TsmEvent::Retransmit {
                    invoke_id,
                    dest,
                    npdu,
                    apdu,
                } => {
                    trace!("retransmitting invoke id {}", invoke_id);
                    let mut pdu = Vec::new();
                    let mut header = Npdu::for_destination(&dest, true);
                    header.data.priority = npdu.priority;
                    header.encode(&mut pdu);
                    pdu.extend_from_slice(&apdu);
                    if link.send_pdu(&dest, &npdu, &pdu).is_err() {
                        warn!("retransmit send failed for invoke id {}", invoke_id);
                    }
                }
                TsmEvent::TimedOut { invoke_id } => {
                    self.counters.timeouts += 1;
                    events.push(StackEvent::Confirmed {
                        invoke_id,
                        outcome: ConfirmedOutcome::Timeout,
                    });
                }
                TsmEvent::Aborted { invoke_id, dest } => {
                    self.send_abort(link, &dest, invoke_id, AbortReason::TsmTimeout);
                    events.push(StackEvent::Confirmed {
                        invoke_id,
                        outcome: ConfirmedOutcome::Abort(AbortReason::TsmTimeout),
                    });
                }
            }
        }

        self.age_remainder += elapsed;
        let whole_seconds = self.age_remainder.as_secs() as u32;
        if whole_seconds > 0 {
            self.age_remainder -= Duration::from_secs(u64::from(whole_seconds));
            self.cache.tick_seconds(whole_seconds);
        }

        for device_id in self.cache.drain_who_is() {
            let _ = self.who_is(link, Some((device_id, device_id)));
        }

        events
    }

    /// Send a confirmed request to an explicit address; returns the
    /// allocated invoke-id.
    pub fn send_confirmed_to(
        &mut self,
        link: &mut dyn DataLink,
        dest: &Address,
        choice: ConfirmedServiceChoice,
        service_data: Vec<u8>,
    ) -> Result<u8> {
        let npdu_data = NpduData::application(true);
        let invoke_id = self.tsm.allocate(
            dest.clone(),
            npdu_data.clone(),
            choice as u8,
            Vec::new(),
        )?;

        let mut request = ConfirmedRequest::new(invoke_id, choice as u8, service_data);
        request.max_apdu = MaxApduSize::from_size(self.config.max_apdu);
        request.max_segments = MaxSegments::Unspecified;

        let mut apdu = Vec::new();
        Apdu::ConfirmedRequest(request).encode(&mut apdu);
        self.tsm.set_apdu(invoke_id, apdu.clone());

        let mut pdu = Vec::new();
        Npdu::for_destination(dest, true).encode(&mut pdu);
        pdu.extend_from_slice(&apdu);

        if let Err(error) = link.send_pdu(dest, &npdu_data, &pdu) {
            self.tsm.free(invoke_id);
            return Err(error.into());
        }
        Ok(invoke_id)
    }

    /// Send a confirmed request to a device instance, resolving through
    /// the address cache. A miss queues a Who-Is (sent on the next tick)
    /// and fails with `NotBound`.
    pub fn send_confirmed(
        &mut self,
        link: &mut dyn DataLink,
        device_id: u32,
        choice: ConfirmedServiceChoice,
        service_data: Vec<u8>,
    ) -> Result<u8> {
        let (address, _max_apdu) = self.cache.bind_request(device_id)?;
        self.send_confirmed_to(link, &address, choice, service_data)
    }

    /// Send an unconfirmed request.
    pub fn send_unconfirmed(
        &mut self,
        link: &mut dyn DataLink,
        dest: &Address,
        choice: UnconfirmedServiceChoice,
        service_data: Vec<u8>,
    ) -> Result<()> {
        let apdu = Apdu::UnconfirmedRequest {
            service_choice: choice as u8,
            service_data,
        };
        self.send_apdu(link, dest, false, &apdu);
        Ok(())
    }

    /// Broadcast a Who-Is, optionally bounded to an instance range, and
    /// start accepting unsolicited I-Am announcements into the cache.
    pub fn who_is(
        &mut self,
        link: &mut dyn DataLink,
        range: Option<(u32, u32)>,
    ) -> Result<()> {
        self.discovering = true;
        let request = match range {
            Some((low, high)) => WhoIsRequest::for_range(low, high),
            None => WhoIsRequest::new(),
        };
        let mut service_data = Vec::new();
        request.encode(&mut service_data)?;
        self.send_unconfirmed(
            link,
            &Address::global_broadcast(),
            UnconfirmedServiceChoice::WhoIs,
            service_data,
        )
    }

    /// Broadcast this device's I-Am.
    pub fn i_am(&mut self, link: &mut dyn DataLink) -> Result<()> {
        let request = IAmRequest::new(
            crate::encoding::ObjectIdentifier::device(self.config.device_instance)?,
            self.config.max_apdu,
            self.config.segmentation,
            self.config.vendor_id,
        );
        let mut service_data = Vec::new();
        request.encode(&mut service_data)?;
        self.send_unconfirmed(
            link,
            &Address::global_broadcast(),
            UnconfirmedServiceChoice::IAm,
            service_data,
        )
    }

    /// Send the deferred complex ACK for a request whose handler returned
    /// `ReplyPostponed`.
    pub fn send_complex_ack(
        &mut self,
        link: &mut dyn DataLink,
        dest: &Address,
        invoke_id: u8,
        choice: ConfirmedServiceChoice,
        service_data: Vec<u8>,
    ) {
        self.send_apdu(
            link,
            dest,
            false,
            &Apdu::ComplexAck(ComplexAck::new(invoke_id, choice as u8, service_data)),
        );
    }

    /// Send an Error PDU for a postponed request.
    pub fn send_error(
        &mut self,
        link: &mut dyn DataLink,
        dest: &Address,
        invoke_id: u8,
        choice: ConfirmedServiceChoice,
        error: ErrorClassCode,
    ) {
        let mut error_data = Vec::new();
        error.encode(&mut error_data);
        self.send_apdu(
            link,
            dest,
            false,
            &Apdu::Error {
                invoke_id,
                service_choice: choice as u8,
                error_data,
            },
        );
    }

    fn send_reject(
        &mut self,
        link: &mut dyn DataLink,
        dest: &Address,
        invoke_id: u8,
        reason: RejectReason,
    ) {
        self.counters.rejects_sent += 1;
        self.send_apdu(link, dest, false, &Apdu::Reject { invoke_id, reason });
    }

    fn send_abort(
        &mut self,
        link: &mut dyn DataLink,
        dest: &Address,
        invoke_id: u8,
        reason: AbortReason,
    ) {
        self.send_apdu(
            link,
            dest,
            false,
            &Apdu::Abort {
                server: true,
                invoke_id,
                reason,
            },
        );
    }

    fn send_apdu(
        &mut self,
        link: &mut dyn DataLink,
        dest: &Address,
        expecting_reply: bool,
        apdu: &Apdu,
    ) {
        let mut pdu = Vec::new();
        let npdu = Npdu::for_destination(dest, expecting_reply);
        npdu.encode(&mut pdu);
        apdu.encode(&mut pdu);
        if link.send_pdu(dest, &npdu.data, &pdu).is_err() {
            warn!("send failed for {:?} pdu", apdu.pdu_type());
        }
    }
}

/// Where a reply to this NPDU must go: the source specifier when a
/// router filled one in, otherwise the datalink source address.
fn reply_address(npdu: &Npdu, link_src: &Address) -> Address {
    match &npdu.source {
        Some(source) => Address {
            net: source.net,
            adr: source.adr.clone(),
            mac: link_src.mac.clone(),
        },
        None => link_src.clone(),
    }
}

/// Walk a service body's tag grammar without interpreting it, verifying
/// that every announced length fits inside the body.
fn validate_tlv(body: &[u8]) -> core::result::Result<(), CodecError> {
    let mut pos = 0usize;
    while pos < body.len() {
        pos += skip_value(&body[pos..])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "std"))]
    use alloc::vec;

    use crate::datalink::LoopbackLink;
    use crate::encoding::ObjectIdentifier;
    use crate::service::confirmed::ReadPropertyRequest;

    fn stack() -> Stack {
        Stack::new(DeviceConfig::default()).unwrap()
    }

    fn link() -> LoopbackLink {
        LoopbackLink::new(Address::local(&[0x01]))
    }

    fn encode_apdu(apdu: &Apdu) -> Vec<u8> {
        let mut pdu = Vec::new();
        Npdu::local(matches!(apdu, Apdu::ConfirmedRequest(_))).encode(&mut pdu);
        apdu.encode(&mut pdu);
        pdu
    }

    #[test]
    fn who_is_i_am_round_trip() {
        let mut stack = stack();
        let mut link = link();

        // S1: an unlimited Who-Is is the two-octet APDU 10 08
        stack.who_is(&mut link, None).unwrap();
        let (dest, pdu) = stack_last(&link);
        assert!(dest.is_global_broadcast());
        let (_, offset) = Npdu::decode(&pdu).unwrap();
        assert_eq!(&pdu[offset..], [0x10, 0x08]);

        // The I-Am answer populates the cache
        let i_am = Apdu::UnconfirmedRequest {
            service_choice: UnconfirmedServiceChoice::IAm as u8,
            service_data: vec![
                0xC4, 0x02, 0x00, 0x01, 0x04, 0x22, 0x01, 0xE0, 0x91, 0x00, 0x22, 0x01, 0x04,
            ],
        };
        let src = Address::local(&[0x0A]);
        let events = stack.process_pdu(&mut link, &src, &encode_apdu(&i_am));
        assert_eq!(events.len(), 1);
        match &events[0] {
            StackEvent::IAmReceived { request, .. } => {
                assert_eq!(request.device_id.instance, 260);
                assert_eq!(request.max_apdu, 480);
                assert_eq!(request.vendor_id, 260);
            }
            other => panic!("unexpected {:?}", other),
        }
        let (address, max_apdu) = stack.address_cache_mut().get(260).unwrap();
        assert_eq!(address, &src);
        assert_eq!(max_apdu, 480);
    }

    fn stack_last(link: &LoopbackLink) -> (Address, Vec<u8>) {
        let (dest, pdu) = link.last_sent().unwrap();
        (dest.clone(), pdu.clone())
    }

    #[test]
    fn who_is_for_our_instance_answered_with_i_am() {
        let mut stack = stack();
        let mut link = link();
        let who_is = Apdu::UnconfirmedRequest {
            service_choice: UnconfirmedServiceChoice::WhoIs as u8,
            service_data: Vec::new(),
        };
        stack.process_pdu(&mut link, &Address::local(&[0x0A]), &encode_apdu(&who_is));

        let (_, pdu) = stack_last(&link);
        let (_, offset) = Npdu::decode(&pdu).unwrap();
        // device 260, max-apdu 1476, no segmentation, vendor 260
        assert_eq!(
            &pdu[offset..],
            [0x10, 0x00, 0xC4, 0x02, 0x00, 0x01, 0x04, 0x22, 0x05, 0xC4, 0x91, 0x03, 0x22,
             0x01, 0x04]
        );
    }

    #[test]
    fn who_is_outside_range_not_answered() {
        let mut stack = stack();
        let mut link = link();
        let who_is = Apdu::UnconfirmedRequest {
            service_choice: UnconfirmedServiceChoice::WhoIs as u8,
            service_data: vec![0x09, 0x01, 0x19, 0x0A], // 1..=10
        };
        stack.process_pdu(&mut link, &Address::local(&[0x0A]), &encode_apdu(&who_is));
        assert!(link.last_sent().is_none());
    }

    #[test]
    fn confirmed_request_dispatches_and_acks() {
        let mut stack = stack();
        let mut link = link();
        stack.dispatcher_mut().register_confirmed(
            ConfirmedServiceChoice::ReadProperty,
            Box::new(|body, _npdu, _src, _data| {
                let request = ReadPropertyRequest::decode(body).unwrap();
                assert_eq!(request.property_id, 77);
                HandlerOutcome::ComplexAck(vec![0x0C, 0x02, 0x00, 0x01, 0x04])
            }),
        );

        let mut body = Vec::new();
        ReadPropertyRequest::new(ObjectIdentifier::device(260).unwrap(), 77)
            .encode(&mut body)
            .unwrap();
        let request = Apdu::ConfirmedRequest(ConfirmedRequest::new(
            7,
            ConfirmedServiceChoice::ReadProperty as u8,
            body,
        ));
        stack.process_pdu(&mut link, &Address::local(&[0x0A]), &encode_apdu(&request));

        let (dest, pdu) = stack_last(&link);
        assert_eq!(dest, Address::local(&[0x0A]));
        let (_, offset) = Npdu::decode(&pdu).unwrap();
        match Apdu::decode(&pdu[offset..]).unwrap() {
            Apdu::ComplexAck(ack) => {
                assert_eq!(ack.invoke_id, 7);
                assert_eq!(ack.service_choice, 12);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(stack.counters().confirmed_requests, 1);
    }

    #[test]
    fn unregistered_confirmed_service_rejected() {
        let mut stack = stack();
        let mut link = link();
        let request = Apdu::ConfirmedRequest(ConfirmedRequest::new(
            9,
            ConfirmedServiceChoice::DeleteObject as u8,
            vec![0xC4, 0x04, 0x40, 0x00, 0x03],
        ));
        stack.process_pdu(&mut link, &Address::local(&[0x0A]), &encode_apdu(&request));

        let (_, pdu) = stack_last(&link);
        let (_, offset) = Npdu::decode(&pdu).unwrap();
        assert_eq!(
            Apdu::decode(&pdu[offset..]).unwrap(),
            Apdu::Reject {
                invoke_id: 9,
                reason: RejectReason::UnrecognizedService,
            }
        );
        assert_eq!(stack.counters().rejects_sent, 1);
    }

    #[test]
    fn malformed_body_rejected_before_any_handler() {
        let mut stack = stack();
        let mut link = link();
        // A handler is registered, but must never run
        stack.dispatcher_mut().register_confirmed(
            ConfirmedServiceChoice::ReadProperty,
            Box::new(|_body, _npdu, _src, _data| {
                panic!("handler must not run for a malformed body")
            }),
        );

        // Octet string announcing 200 octets with only 3 present
        let request = Apdu::ConfirmedRequest(ConfirmedRequest::new(
            3,
            ConfirmedServiceChoice::ReadProperty as u8,
            vec![0x65, 200, 0x01, 0x02, 0x03],
        ));
        stack.process_pdu(&mut link, &Address::local(&[0x0A]), &encode_apdu(&request));

        assert_eq!(stack.counters().apdu_decode_errors, 1);
        let (_, pdu) = stack_last(&link);
        let (_, offset) = Npdu::decode(&pdu).unwrap();
        assert_eq!(
            Apdu::decode(&pdu[offset..]).unwrap(),
            Apdu::Reject {
                invoke_id: 3,
                reason: RejectReason::MissingRequiredParameter,
            }
        );
    }

    #[test]
    fn segmented_request_aborted() {
        let mut stack = stack();
        let mut link = link();
        let mut request = ConfirmedRequest::new(4, 12, vec![0x0C]);
        request.segmented = true;
        request.sequence_number = Some(0);
        request.proposed_window_size = Some(4);
        stack.process_pdu(
            &mut link,
            &Address::local(&[0x0A]),
            &encode_apdu(&Apdu::ConfirmedRequest(request)),
        );
        let (_, pdu) = stack_last(&link);
        let (_, offset) = Npdu::decode(&pdu).unwrap();
        assert_eq!(
            Apdu::decode(&pdu[offset..]).unwrap(),
            Apdu::Abort {
                server: true,
                invoke_id: 4,
                reason: AbortReason::SegmentationNotSupported,
            }
        );
    }

    #[test]
    fn confirmed_retry_then_timeout() {
        let mut stack = stack();
        let mut link = link();
        stack
            .address_cache_mut()
            .add(260, 480, Address::local(&[0x0A]))
            .unwrap();

        let mut body = Vec::new();
        ReadPropertyRequest::new(ObjectIdentifier::device(260).unwrap(), 77)
            .encode(&mut body)
            .unwrap();
        let invoke_id = stack
            .send_confirmed(&mut link, 260, ConfirmedServiceChoice::ReadProperty, body)
            .unwrap();
        assert_eq!(link.sent.len(), 1);
        let original = link.sent[0].1.clone();

        // S4: three retransmissions of the identical APDU, then exactly
        // one timeout, then the slot is free again.
        let mut timeouts = 0;
        for _ in 0..16 {
            for event in stack.tick(&mut link, Duration::from_millis(1000)) {
                match event {
                    StackEvent::Confirmed {
                        invoke_id: id,
                        outcome: ConfirmedOutcome::Timeout,
                    } => {
                        assert_eq!(id, invoke_id);
                        timeouts += 1;
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
        assert_eq!(timeouts, 1);
        assert_eq!(stack.counters().timeouts, 1);
        assert_eq!(link.sent.len(), 4);
        for (_, resent) in &link.sent[1..] {
            assert_eq!(resent, &original);
        }
        assert_eq!(stack.pending_transactions(), 0);
    }

    #[test]
    fn ack_delivers_confirmed_outcome() {
        let mut stack = stack();
        let mut link = link();
        let dest = Address::local(&[0x0A]);
        let invoke_id = stack
            .send_confirmed_to(
                &mut link,
                &dest,
                ConfirmedServiceChoice::WriteProperty,
                vec![],
            )
            .unwrap();

        let ack = Apdu::SimpleAck {
            invoke_id,
            service_choice: ConfirmedServiceChoice::WriteProperty as u8,
        };
        let events = stack.process_pdu(&mut link, &dest, &encode_apdu(&ack));
        assert_eq!(
            events,
            [StackEvent::Confirmed {
                invoke_id,
                outcome: ConfirmedOutcome::SimpleAck { service_choice: 15 },
            }]
        );
        assert_eq!(stack.pending_transactions(), 0);
    }

    #[test]
    fn unknown_ack_counted_and_dropped() {
        let mut stack = stack();
        let mut link = link();
        let ack = Apdu::SimpleAck {
            invoke_id: 99,
            service_choice: 15,
        };
        let events = stack.process_pdu(&mut link, &Address::local(&[0x0A]), &encode_apdu(&ack));
        assert!(events.is_empty());
        assert_eq!(stack.counters().apdu_unexpected, 1);
    }

    #[test]
    fn foreign_network_npdu_discarded() {
        let mut stack = stack();
        let mut link = link();
        let npdu = Npdu::for_destination(&Address::remote(9, &[0x55], &[]), false);
        let mut pdu = Vec::new();
        npdu.encode(&mut pdu);
        pdu.extend_from_slice(&[0x10, 0x08]);
        let events = stack.process_pdu(&mut link, &Address::local(&[0x0A]), &pdu);
        assert!(events.is_empty());
        assert_eq!(stack.counters().npdu_not_for_us, 1);
        assert!(link.last_sent().is_none());
    }

    #[test]
    fn network_message_routed_to_handler_not_apdu_parser() {
        use core::sync::atomic::{AtomicU32, Ordering};
        static SEEN: AtomicU32 = AtomicU32::new(0);

        let mut stack = stack();
        let mut link = link();
        stack.set_network_handler(Box::new(|message_type, payload, _src| {
            assert_eq!(message_type, NetworkMessageType::WhatIsNetworkNumber);
            assert!(payload.is_empty());
            SEEN.fetch_add(1, Ordering::Relaxed);
        }));

        let pdu = [0x01, 0x80, 0x12];
        let events = stack.process_pdu(&mut link, &Address::local(&[0x0A]), &pdu);
        assert!(events.is_empty());
        assert_eq!(SEEN.load(Ordering::Relaxed), 1);
        assert_eq!(stack.counters().network_messages, 1);
    }

    #[test]
    fn cache_expiry_reissues_who_is_on_next_reference() {
        let mut stack = stack();
        let mut link = link();
        stack
            .address_cache_mut()
            .add_with_ttl(1234, 480, Address::local(&[0x0B]), 60)
            .unwrap();

        // S6: 59 seconds in, the binding still stands
        stack.tick(&mut link, Duration::from_secs(59));
        assert!(stack.address_cache_mut().get(1234).is_some());

        stack.tick(&mut link, Duration::from_secs(1));
        assert!(stack.address_cache_mut().get(1234).is_none());

        // The next reference fails and triggers a targeted Who-Is
        let result = stack.send_confirmed(
            &mut link,
            1234,
            ConfirmedServiceChoice::ReadProperty,
            vec![],
        );
        assert_eq!(result, Err(StackError::Bind(BindError::NotBound)));
        stack.tick(&mut link, Duration::from_millis(1));
        let (dest, pdu) = stack_last(&link);
        assert!(dest.is_global_broadcast());
        let (_, offset) = Npdu::decode(&pdu).unwrap();
        let decoded = Apdu::decode(&pdu[offset..]).unwrap();
        match decoded {
            Apdu::UnconfirmedRequest {
                service_choice,
                service_data,
            } => {
                assert_eq!(service_choice, UnconfirmedServiceChoice::WhoIs as u8);
                let who_is = WhoIsRequest::decode(&service_data).unwrap();
                assert_eq!(who_is.low_limit, Some(1234));
                assert_eq!(who_is.high_limit, Some(1234));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reply_follows_npdu_source_specifier() {
        let mut stack = stack();
        let mut link = link();
        // A routed Who-Is whose source specifier names network 7
        let npdu = Npdu {
            destination: None,
            source: Some(Address::remote(7, &[0x21], &[])),
            data: NpduData::application(false),
        };
        let mut pdu = Vec::new();
        npdu.encode(&mut pdu);
        pdu.extend_from_slice(&[0x10, 0x08]);
        stack.process_pdu(&mut link, &Address::local(&[0x0A]), &pdu);

        // The I-Am reply is addressed back through the router
        let (dest, _) = stack_last(&link);
        assert!(dest.is_global_broadcast());
    }

    #[test]
    fn invalid_config_rejected() {
        let config = DeviceConfig {
            max_apdu: 1000,
            ..DeviceConfig::default()
        };
        assert!(matches!(Stack::new(config), Err(StackError::InvalidConfig)));

        let config = DeviceConfig {
            max_tsm_transactions: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(Stack::new(config), Err(StackError::InvalidConfig)));
    }

    #[test]
    fn npdu_decode_error_counted() {
        let mut stack = stack();
        let mut link = link();
        let events = stack.process_pdu(&mut link, &Address::local(&[0x0A]), &[0x02, 0x00]);
        assert!(events.is_empty());
        assert_eq!(stack.counters().npdu_decode_errors, 1);
    }
}
