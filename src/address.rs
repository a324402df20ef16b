//! Device address cache: the bounded mapping from device instance numbers
//! to network addresses that client requests consult before sending.
//!
//! Entries are created by received I-Am announcements or explicit static
//! bindings, age out on a once-per-second tick unless held, and are
//! evicted oldest-first when the cache is full. A bind request for an
//! unknown device reserves a slot in the requested state and queues one
//! Who-Is for the caller to transmit.

#[cfg(feature = "std")]
use std::error::Error;

#[cfg(feature = "std")]
use std::fmt;

#[cfg(not(feature = "std"))]
use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use log::debug;

use crate::network::Address;

/// Result type for cache operations
#[cfg(feature = "std")]
pub type Result<T> = std::result::Result<T, BindError>;

#[cfg(not(feature = "std"))]
pub type Result<T> = core::result::Result<T, BindError>;

/// Default cache capacity.
pub const MAX_ADDRESS_CACHE: usize = 255;

/// Default entry lifetime in seconds, refreshed by every I-Am.
pub const DEFAULT_TTL_SECONDS: u32 = 300;

/// Errors raised by cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// No binding exists for the device instance
    NotBound,
    /// Every slot is occupied by a held entry
    CacheFull,
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::NotBound => write!(f, "Device is not bound"),
            BindError::CacheFull => write!(f, "Address cache is full"),
        }
    }
}

#[cfg(feature = "std")]
impl Error for BindError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    /// A Who-Is went out; the slot waits for the matching I-Am
    Requested,
    Bound,
}

/// One cache slot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub device_id: u32,
    pub address: Address,
    pub max_apdu: u16,
    /// Held entries never age out
    pub hold: bool,
    /// Seconds until expiry; meaningless while held
    pub ttl_seconds: u32,
    state: EntryState,
    sequence: u64,
}

/// Fixed-capacity device-instance → address cache.
#[derive(Debug)]
pub struct AddressCache {
    entries: Vec<CacheEntry>,
    capacity: usize,
    default_ttl: u32,
    sequence: u64,
    /// Device instances for which the caller should transmit a Who-Is
    who_is_queue: Vec<u32>,
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new(MAX_ADDRESS_CACHE)
    }
}

impl AddressCache {
    /// A cache with the given slot count.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            default_ttl: DEFAULT_TTL_SECONDS,
            sequence: 0,
            who_is_queue: Vec::new(),
        }
    }

    /// Change the lifetime applied to new and refreshed bindings.
    pub fn set_default_ttl(&mut self, seconds: u32) {
        self.default_ttl = seconds;
    }

    /// Number of occupied slots (bound or requested).
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Read a slot by position, for diagnostics and iteration.
    pub fn by_index(&self, index: usize) -> Option<&CacheEntry> {
        self.entries.get(index)
    }

    /// Insert or refresh a binding with the default lifetime.
    pub fn add(&mut self, device_id: u32, max_apdu: u16, address: Address) -> Result<()> {
        self.add_with_ttl(device_id, max_apdu, address, self.default_ttl)
    }

    /// Insert or refresh a binding with an explicit lifetime.
    pub fn add_with_ttl(
        &mut self,
        device_id: u32,
        max_apdu: u16,
        address: Address,
        ttl_seconds: u32,
    ) -> Result<()> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.device_id == device_id) {
            entry.address = address;
            entry.max_apdu = max_apdu;
            entry.ttl_seconds = ttl_seconds;
            entry.state = EntryState::Bound;
            return Ok(());
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest()?;
        }

        self.sequence += 1;
        self.entries.push(CacheEntry {
            device_id,
            address,
            max_apdu,
            hold: false,
            ttl_seconds,
            state: EntryState::Bound,
            sequence: self.sequence,
        });
        Ok(())
    }

    /// Remove a binding; idempotent.
    pub fn remove(&mut self, device_id: u32) {
        self.entries.retain(|e| e.device_id != device_id);
    }

    /// Look up a bound device.
    pub fn get(&self, device_id: u32) -> Option<(&Address, u16)> {
        self.entries
            .iter()
            .find(|e| e.device_id == device_id && e.state == EntryState::Bound)
            .map(|e| (&e.address, e.max_apdu))
    }

    /// Is a Who-Is outstanding for this device?
    pub fn is_requested(&self, device_id: u32) -> bool {
        self.entries
            .iter()
            .any(|e| e.device_id == device_id && e.state == EntryState::Requested)
    }

    /// Mark an entry immortal (or mortal again).
    pub fn set_hold(&mut self, device_id: u32, hold: bool) -> Result<()> {
        match self.entries.iter_mut().find(|e| e.device_id == device_id) {
            Some(entry) => {
                entry.hold = hold;
                Ok(())
            }
            None => Err(BindError::NotBound),
        }
    }

    /// Resolve a device for an outbound request.
    ///
    /// On a miss the instance is recorded as requested and one Who-Is is
    /// queued for the caller ([`AddressCache::drain_who_is`]); repeated
    /// misses while the request is outstanding do not queue duplicates.
    pub fn bind_request(&mut self, device_id: u32) -> Result<(Address, u16)> {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.device_id == device_id && e.state == EntryState::Bound)
        {
            return Ok((entry.address.clone(), entry.max_apdu));
        }

        if self
            .entries
            .iter()
            .any(|e| e.device_id == device_id && e.state == EntryState::Requested)
        {
            return Err(BindError::NotBound);
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest()?;
        }

        self.sequence += 1;
        self.entries.push(CacheEntry {
            device_id,
            address: Address::default(),
            max_apdu: 0,
            hold: false,
            ttl_seconds: self.default_ttl,
            state: EntryState::Requested,
            sequence: self.sequence,
        });
        self.who_is_queue.push(device_id);
        debug!("address bind request queued for device {}", device_id);
        Err(BindError::NotBound)
    }

    /// Device instances the caller should now send a Who-Is for.
    pub fn drain_who_is(&mut self) -> Vec<u32> {
        core::mem::take(&mut self.who_is_queue)
    }

    /// Age every non-held entry by `seconds`; expired entries are removed.
    pub fn tick_seconds(&mut self, seconds: u32) {
        self.entries.retain_mut(|entry| {
            if entry.hold {
                return true;
            }
            if entry.ttl_seconds <= seconds {
                debug!("address binding for device {} expired", entry.device_id);
                false
            } else {
                entry.ttl_seconds -= seconds;
                true
            }
        });
    }

    /// Serialise bound entries to a storage blob: for each binding,
    /// device id (u32), max APDU (u16), net (u16), MAC and ADR with
    /// one-octet length prefixes, all big-endian.
    pub fn export_bindings(&self) -> Vec<u8> {
        let mut blob = Vec::new();
        for entry in &self.entries {
            if entry.state != EntryState::Bound {
                continue;
            }
            blob.extend_from_slice(&entry.device_id.to_be_bytes());
            blob.extend_from_slice(&entry.max_apdu.to_be_bytes());
            blob.extend_from_slice(&entry.address.net.to_be_bytes());
            blob.push(entry.address.mac.len() as u8);
            blob.extend_from_slice(&entry.address.mac);
            blob.push(entry.address.adr.len() as u8);
            blob.extend_from_slice(&entry.address.adr);
        }
        blob
    }

    /// Restore bindings from [`AddressCache::export_bindings`] output.
    /// Imported entries are held; a later I-Am refreshes them in place.
    pub fn import_bindings(&mut self, blob: &[u8]) -> Result<usize> {
        let mut pos = 0usize;
        let mut imported = 0usize;
        while pos + 9 <= blob.len() {
            let device_id = u32::from_be_bytes([
                blob[pos],
                blob[pos + 1],
                blob[pos + 2],
                blob[pos + 3],
            ]);
            let max_apdu = u16::from_be_bytes([blob[pos + 4], blob[pos + 5]]);
            let net = u16::from_be_bytes([blob[pos + 6], blob[pos + 7]]);
            pos += 8;
            let mac_len = blob[pos] as usize;
            pos += 1;
            if pos + mac_len + 1 > blob.len() {
                break;
            }
            let mac = blob[pos..pos + mac_len].to_vec();
            pos += mac_len;
            let adr_len = blob[pos] as usize;
            pos += 1;
            if pos + adr_len > blob.len() {
                break;
            }
            let adr = blob[pos..pos + adr_len].to_vec();
            pos += adr_len;

            self.add(device_id, max_apdu, Address { net, mac, adr })?;
            self.set_hold(device_id, true)?;
            imported += 1;
        }
        Ok(imported)
    }

    fn evict_oldest(&mut self) -> Result<()> {
        let victim = self
            .entries
            .iter()
            .filter(|e| !e.hold)
            .min_by_key(|e| e.sequence)
            .map(|e| e.device_id);
        match victim {
            Some(device_id) => {
                debug!("address cache full, evicting device {}", device_id);
                self.remove(device_id);
                Ok(())
            }
            None => Err(BindError::CacheFull),
        }
    }
}

/// Optional persistence hook for address bindings. The blob format is
/// whatever [`AddressCache::export_bindings`] produced.
pub trait BindingStore {
    /// Persist the blob; returns false when storage is unavailable.
    fn save(&mut self, blob: &[u8]) -> bool;
    /// Load a previously saved blob, if any.
    fn load(&mut self) -> Option<Vec<u8>>;
}
