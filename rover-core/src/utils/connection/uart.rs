//! BLE UART Service Module
//!
//! A custom two-characteristic GATT profile that emulates a serial line over
//! BLE: centrals write command text into the RX characteristic and the rover
//! broadcasts outbound bytes on the notify-only TX characteristic.
//!
//! The radio itself (advertising encoding, link layer, GATT database) lives
//! behind the [`BleStack`] trait. [`UartService`] only tracks which centrals
//! are connected, buffers inbound bytes and re-arms advertising.
//!
//! Event flow:
//!
//! ```text
//! Idle --new()--> Advertising --connect--> Connected(n) --disconnect--> Advertising
//! ```
//!
//! Every disconnect re-arms advertising, even while other centrals remain
//! connected.

use core::fmt::Debug;

use embassy_time::Duration;
use heapless::{Deque, FnvIndexSet, String, Vec};

use crate::utils::config::RoverConfig;

/// Opaque connection handle assigned by the BLE stack.
pub type ConnHandle = u16;
/// Opaque attribute (value) handle assigned at service registration.
pub type AttrHandle = u16;

/// Primary service UUID.
pub const UART_SERVICE_UUID: u128 = 0x0bc0a05f_a921_47c5_9add_340f010349fe;
/// Notify-only outbound characteristic.
pub const UART_TX_UUID: u128 = 0x0bc0a05f_a921_47c5_9add_340f010349fe;
/// Write-only inbound characteristic.
pub const UART_RX_UUID: u128 = 0xe4407cbd_8edb_4d19_849a_c387b22788b0;

pub const FLAG_WRITE: u16 = 0x0008;
pub const FLAG_NOTIFY: u16 = 0x0010;

/// GAP appearance code for a generic computer.
pub const APPEARANCE_GENERIC_COMPUTER: u16 = 128;

/// Maximum number of simultaneously tracked centrals (power of two).
pub const MAX_CONNECTIONS: usize = 4;

/// Longest device name that fits a legacy advertising payload.
pub const MAX_NAME_LEN: usize = 29;

/// A single characteristic declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: u128,
    pub flags: u16,
}

/// Service declaration handed to [`BleStack::register_uart_service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDef {
    pub uuid: u128,
    pub tx: Characteristic,
    pub rx: Characteristic,
}

/// The UART service layout: TX (notify) first, RX (write) second.
pub const UART_SERVICE: ServiceDef = ServiceDef {
    uuid: UART_SERVICE_UUID,
    tx: Characteristic {
        uuid: UART_TX_UUID,
        flags: FLAG_NOTIFY,
    },
    rx: Characteristic {
        uuid: UART_RX_UUID,
        flags: FLAG_WRITE,
    },
};

/// Fixed advertising parameters. Encoding into AD structures is up to the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: String<MAX_NAME_LEN>,
    pub appearance: u16,
    pub interval: Duration,
}

/// Events delivered by the BLE stack from its interrupt/event context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleEvent<'a> {
    Connect(ConnHandle),
    Disconnect(ConnHandle),
    Write {
        conn: ConnHandle,
        attr: AttrHandle,
        data: &'a [u8],
    },
}

/// Narrow interface to the underlying BLE stack.
pub trait BleStack {
    type Error: Debug;

    /// Register the service and return `(tx, rx)` value handles.
    fn register_uart_service(
        &mut self,
        service: &ServiceDef,
    ) -> Result<(AttrHandle, AttrHandle), Self::Error>;

    /// Size the stack-side buffer for writes to `attr`.
    fn set_buffer(
        &mut self,
        attr: AttrHandle,
        len: usize,
        append: bool,
    ) -> Result<(), Self::Error>;

    /// Start (or restart) advertising with the given parameters.
    fn advertise(
        &mut self,
        adv: &Advertisement,
    ) -> Result<(), Self::Error>;

    /// Send a notification on `attr` to one connected central.
    fn notify(
        &mut self,
        conn: ConnHandle,
        attr: AttrHandle,
        data: &[u8],
    ) -> Result<(), Self::Error>;

    /// Terminate the link to `conn`.
    fn disconnect(
        &mut self,
        conn: ConnHandle,
    ) -> Result<(), Self::Error>;
}

/// Errors surfaced while bringing the service up.
#[derive(Debug)]
pub enum ServiceError<E: Debug> {
    Register(E),
    Buffer(E),
}

/// Coarse lifecycle state, derived from the connection set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Advertising,
    Connected(usize),
}

/// FIFO of inbound bytes with a fixed capacity of `N`.
///
/// Bytes that do not fit are dropped from the tail of the incoming write; bytes
/// already buffered are never reordered or duplicated.
pub struct RxBuffer<const N: usize> {
    bytes: Deque<u8, N>,
}

impl<const N: usize> RxBuffer<N> {
    pub const fn new() -> Self {
        Self {
            bytes: Deque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append `data`, returning how many bytes were accepted.
    pub fn extend_from_slice(
        &mut self,
        data: &[u8],
    ) -> usize {
        let mut accepted = 0;
        for &byte in data {
            if self.bytes.push_back(byte).is_err() {
                tracing::warn!(
                    dropped = data.len() - accepted,
                    capacity = N,
                    "rx buffer full, dropping bytes"
                );
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Remove up to `n` bytes from the front; `None` or `Some(0)` drains everything.
    pub fn read(
        &mut self,
        n: Option<usize>,
    ) -> Vec<u8, N> {
        let take = match n {
            Some(n) if n > 0 => n.min(self.bytes.len()),
            _ => self.bytes.len(),
        };
        let mut out = Vec::new();
        for _ in 0..take {
            match self.bytes.pop_front() {
                // `take <= len <= N`, so the output never overflows.
                Some(byte) => {
                    let _ = out.push(byte);
                }
                None => break,
            }
        }
        out
    }
}

impl<const N: usize> Default for RxBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback invoked once per accepted write, from the receive-event context.
///
/// Implementations must be short and must not block.
pub trait RxHandler<const N: usize> {
    fn on_rx(
        &mut self,
        rx: &mut RxBuffer<N>,
    );
}

/// No handler registered: bytes simply accumulate until read.
impl<const N: usize> RxHandler<N> for () {
    fn on_rx(
        &mut self,
        _rx: &mut RxBuffer<N>,
    ) {
    }
}

/// The BLE UART service: connection set, receive buffer and broadcast notify.
pub struct UartService<S, H, const N: usize> {
    stack: S,
    handler: H,
    tx_handle: AttrHandle,
    rx_handle: AttrHandle,
    connections: FnvIndexSet<ConnHandle, MAX_CONNECTIONS>,
    rx_buffer: RxBuffer<N>,
    advertisement: Advertisement,
    started: bool,
}

impl<S, H, const N: usize> UartService<S, H, N>
where
    S: BleStack,
    H: RxHandler<N>,
{
    /// Register the service, size the RX buffer and start advertising.
    pub fn new(
        mut stack: S,
        handler: H,
        config: &RoverConfig,
    ) -> Result<Self, ServiceError<S::Error>> {
        let (tx_handle, rx_handle) = stack
            .register_uart_service(&UART_SERVICE)
            .map_err(ServiceError::Register)?;
        stack
            .set_buffer(rx_handle, config.rx_buffer_len, true)
            .map_err(ServiceError::Buffer)?;
        tracing::info!(tx_handle, rx_handle, "UART service registered");

        let mut service = UartService {
            stack,
            handler,
            tx_handle,
            rx_handle,
            connections: FnvIndexSet::new(),
            rx_buffer: RxBuffer::new(),
            advertisement: config.advertisement(),
            started: false,
        };
        service.advertise();
        Ok(service)
    }

    /// (Re)start advertising with the fixed payload.
    pub fn advertise(&mut self) {
        match self.stack.advertise(&self.advertisement) {
            Ok(()) => {
                self.started = true;
                tracing::info!(
                    name = self.advertisement.name.as_str(),
                    interval_ms = self.advertisement.interval.as_millis(),
                    "advertising"
                );
            }
            Err(error) => tracing::error!(?error, "failed to start advertising"),
        }
    }

    /// Dispatch a raw stack event.
    pub fn on_event(
        &mut self,
        event: BleEvent<'_>,
    ) {
        match event {
            BleEvent::Connect(conn) => self.on_connect(conn),
            BleEvent::Disconnect(conn) => self.on_disconnect(conn),
            BleEvent::Write { conn, attr, data } => self.on_write(conn, attr, data),
        }
    }

    pub fn on_connect(
        &mut self,
        conn: ConnHandle,
    ) {
        match self.connections.insert(conn) {
            Ok(_) => tracing::info!(conn, active = self.connections.len(), "central connected"),
            Err(_) => tracing::warn!(conn, "connection table full, ignoring central"),
        }
    }

    pub fn on_disconnect(
        &mut self,
        conn: ConnHandle,
    ) {
        if self.connections.remove(&conn) {
            tracing::info!(conn, active = self.connections.len(), "central disconnected");
        }
        self.advertise();
    }

    /// Buffer a write from an active central to the RX characteristic.
    pub fn on_write(
        &mut self,
        conn: ConnHandle,
        attr: AttrHandle,
        data: &[u8],
    ) {
        if !self.connections.contains(&conn) || attr != self.rx_handle {
            tracing::debug!(conn, attr, "ignoring write from unknown connection or attribute");
            return;
        }
        self.rx_buffer.extend_from_slice(data);
        self.handler.on_rx(&mut self.rx_buffer);
    }

    /// Number of buffered inbound bytes.
    pub fn any(&self) -> usize {
        self.rx_buffer.len()
    }

    /// Remove up to `n` bytes (all when `None`) from the front of the receive buffer.
    pub fn read(
        &mut self,
        n: Option<usize>,
    ) -> Vec<u8, N> {
        self.rx_buffer.read(n)
    }

    /// Best-effort broadcast to every connected central.
    pub fn notify(
        &mut self,
        data: &[u8],
    ) {
        for &conn in self.connections.iter() {
            if let Err(error) = self.stack.notify(conn, self.tx_handle, data) {
                tracing::debug!(conn, ?error, "notify dropped");
            }
        }
    }

    /// Disconnect every central and forget them.
    pub fn close(&mut self) {
        for &conn in self.connections.iter() {
            if let Err(error) = self.stack.disconnect(conn) {
                tracing::debug!(conn, ?error, "disconnect failed");
            }
        }
        self.connections.clear();
    }

    pub fn state(&self) -> ServiceState {
        match (self.started, self.connections.len()) {
            (false, _) => ServiceState::Idle,
            (true, 0) => ServiceState::Advertising,
            (true, n) => ServiceState::Connected(n),
        }
    }

    pub fn is_connected(
        &self,
        conn: ConnHandle,
    ) -> bool {
        self.connections.contains(&conn)
    }

    pub fn connections(&self) -> impl Iterator<Item = ConnHandle> + '_ {
        self.connections.iter().copied()
    }

    pub fn tx_handle(&self) -> AttrHandle {
        self.tx_handle
    }

    pub fn rx_handle(&self) -> AttrHandle {
        self.rx_handle
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}
