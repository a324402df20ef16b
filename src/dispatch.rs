//! Service dispatcher: routes decoded APDUs to registered per-choice
//! handlers.
//!
//! Registration happens once at startup. A confirmed choice without a
//! handler answers `Reject(unrecognized-service)`; an unconfirmed choice
//! without a handler is dropped silently. Handlers borrow the request
//! body only for the duration of the call and must copy anything they
//! keep.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use log::trace;

use crate::apdu::{ErrorClassCode, MaxApduSize, MaxSegments, RejectReason};
use crate::network::{Address, NpduData};
use crate::service::{ConfirmedServiceChoice, UnconfirmedServiceChoice};

/// Per-request metadata a confirmed handler needs to shape its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedServiceData {
    pub invoke_id: u8,
    pub max_segments: MaxSegments,
    pub max_apdu: MaxApduSize,
    pub segmented_response_accepted: bool,
}

/// A confirmed handler's verdict. The dispatcher's caller turns this into
/// the reply APDU on the same datalink the request arrived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Service succeeded with no result data
    SimpleAck,
    /// Service succeeded; the payload is the ack's service data
    ComplexAck(Vec<u8>),
    /// Service-level failure, reported as an Error PDU
    ServiceError(ErrorClassCode),
    /// Request malformed, reported as a Reject PDU
    Reject(RejectReason),
    /// The handler cannot reply synchronously and takes responsibility
    /// for sending the acknowledgement later under this invoke-id
    ReplyPostponed,
}

/// Handler for one confirmed service choice.
pub type ConfirmedHandler =
    Box<dyn FnMut(&[u8], &NpduData, &Address, &ConfirmedServiceData) -> HandlerOutcome + Send>;

/// Handler for one unconfirmed service choice.
pub type UnconfirmedHandler = Box<dyn FnMut(&[u8], &NpduData, &Address) + Send>;

/// The two per-choice handler tables.
pub struct Dispatcher {
    confirmed: Vec<Option<ConfirmedHandler>>,
    unconfirmed: Vec<Option<UnconfirmedHandler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "confirmed",
                &self.confirmed.iter().filter(|h| h.is_some()).count(),
            )
            .field(
                "unconfirmed",
                &self.unconfirmed.iter().filter(|h| h.is_some()).count(),
            )
            .finish()
    }
}

impl Dispatcher {
    /// Empty tables; every confirmed request is rejected until handlers
    /// register.
    pub fn new() -> Self {
        let mut confirmed = Vec::with_capacity(256);
        let mut unconfirmed = Vec::with_capacity(256);
        confirmed.resize_with(256, || None);
        unconfirmed.resize_with(256, || None);
        Self {
            confirmed,
            unconfirmed,
        }
    }

    /// Install the handler for a confirmed service choice, replacing any
    /// previous registration.
    pub fn register_confirmed(
        &mut self,
        choice: ConfirmedServiceChoice,
        handler: ConfirmedHandler,
    ) {
        self.confirmed[choice as usize] = Some(handler);
    }

    /// Install the handler for an unconfirmed service choice.
    pub fn register_unconfirmed(
        &mut self,
        choice: UnconfirmedServiceChoice,
        handler: UnconfirmedHandler,
    ) {
        self.unconfirmed[choice as usize] = Some(handler);
    }

    /// Is a confirmed handler registered for this raw choice octet?
    pub fn has_confirmed(&self, choice: u8) -> bool {
        self.confirmed[choice as usize].is_some()
    }

    /// Route a confirmed request body to its handler.
    pub fn dispatch_confirmed(
        &mut self,
        choice: u8,
        body: &[u8],
        npdu: &NpduData,
        src: &Address,
        service_data: &ConfirmedServiceData,
    ) -> HandlerOutcome {
        match self.confirmed[choice as usize].as_mut() {
            Some(handler) => handler(body, npdu, src, service_data),
            None => {
                trace!("dispatch: no confirmed handler for choice {}", choice);
                HandlerOutcome::Reject(RejectReason::UnrecognizedService)
            }
        }
    }

    /// Route an unconfirmed request body to its handler. Returns false
    /// when no handler is registered (the request is dropped).
    pub fn dispatch_unconfirmed(
        &mut self,
        choice: u8,
        body: &[u8],
        npdu: &NpduData,
        src: &Address,
    ) -> bool {
        match self.unconfirmed[choice as usize].as_mut() {
            Some(handler) => {
                handler(body, npdu, src);
                true
            }
            None => {
                trace!("dispatch: no unconfirmed handler for choice {}", choice);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "std"))]
    use alloc::vec;

    #[cfg(feature = "std")]
    use std::sync::{Arc, Mutex};

    fn service_data() -> ConfirmedServiceData {
        ConfirmedServiceData {
            invoke_id: 1,
            max_segments: MaxSegments::Unspecified,
            max_apdu: MaxApduSize::Octets1476,
            segmented_response_accepted: false,
        }
    }

    #[test]
    fn unregistered_confirmed_choice_rejects() {
        let mut dispatcher = Dispatcher::new();
        let outcome = dispatcher.dispatch_confirmed(
            ConfirmedServiceChoice::ReadProperty as u8,
            &[],
            &NpduData::application(true),
            &Address::local(&[1]),
            &service_data(),
        );
        assert_eq!(
            outcome,
            HandlerOutcome::Reject(RejectReason::UnrecognizedService)
        );
    }

    #[test]
    fn unregistered_unconfirmed_choice_drops() {
        let mut dispatcher = Dispatcher::new();
        assert!(!dispatcher.dispatch_unconfirmed(
            UnconfirmedServiceChoice::WhoIs as u8,
            &[],
            &NpduData::application(false),
            &Address::local(&[1]),
        ));
    }

    #[test]
    fn confirmed_handler_receives_body_and_replies() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_confirmed(
            ConfirmedServiceChoice::ReadProperty,
            Box::new(|body, _npdu, _src, data| {
                assert_eq!(body, [0xAB, 0xCD]);
                assert_eq!(data.invoke_id, 1);
                HandlerOutcome::ComplexAck(vec![0x3E, 0x3F])
            }),
        );
        let outcome = dispatcher.dispatch_confirmed(
            ConfirmedServiceChoice::ReadProperty as u8,
            &[0xAB, 0xCD],
            &NpduData::application(true),
            &Address::local(&[1]),
            &service_data(),
        );
        assert_eq!(outcome, HandlerOutcome::ComplexAck(vec![0x3E, 0x3F]));
    }

    #[cfg(feature = "std")]
    #[test]
    fn unconfirmed_handler_sees_source_address() {
        let seen = Arc::new(Mutex::new(None));
        let seen_inner = Arc::clone(&seen);
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_unconfirmed(
            UnconfirmedServiceChoice::WhoIs,
            Box::new(move |_body, _npdu, src| {
                *seen_inner.lock().unwrap() = Some(src.clone());
            }),
        );
        let src = Address::local(&[0x42]);
        assert!(dispatcher.dispatch_unconfirmed(
            UnconfirmedServiceChoice::WhoIs as u8,
            &[],
            &NpduData::application(false),
            &src,
        ));
        assert_eq!(seen.lock().unwrap().as_ref(), Some(&src));
    }

    #[test]
    fn registration_replaces_previous_handler() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_confirmed(
            ConfirmedServiceChoice::ReadProperty,
            Box::new(|_, _, _, _| HandlerOutcome::SimpleAck),
        );
        dispatcher.register_confirmed(
            ConfirmedServiceChoice::ReadProperty,
            Box::new(|_, _, _, _| HandlerOutcome::ReplyPostponed),
        );
        let outcome = dispatcher.dispatch_confirmed(
            ConfirmedServiceChoice::ReadProperty as u8,
            &[],
            &NpduData::application(true),
            &Address::local(&[1]),
            &service_data(),
        );
        assert_eq!(outcome, HandlerOutcome::ReplyPostponed);
    }
}
