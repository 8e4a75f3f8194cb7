//! Command decoding for the BLE UART text protocol.
//!
//! A command is one ASCII line, optionally prefixed by the `AT+` marker, made of
//! either a bare action (`STOP`) or an action with a magnitude (`FORWARD:50`).
//! A bare action keeps the magnitude of the previous command.
//!
//! Decoded commands are handed to the control loop through a [`CommandMailbox`],
//! a single-slot cell where the newest command always wins.

use core::{cell::Cell, num::ParseIntError, str::Utf8Error};

use embassy_sync::blocking_mutex::{
    raw::{CriticalSectionRawMutex, RawMutex},
    Mutex,
};

use crate::utils::connection::uart::{RxBuffer, RxHandler};

/// Mailbox shared between the BLE event context and the control loop.
pub static COMMAND_MAILBOX: CommandMailbox<CriticalSectionRawMutex> = CommandMailbox::new();

/// Marker that controllers may put in front of a command.
pub const COMMAND_PREFIX: &str = "AT+";
/// Only the first two characters of the marker are removed, leaving `+ACTION`.
pub const PREFIX_STRIP_LEN: usize = 2;
pub const MAGNITUDE_SEPARATOR: char = ':';

/// Motion (and servo) actions understood by the rover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Stop,
    Forward,
    Backward,
    Left,
    Right,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
    Servo,
    /// Any token not listed above; the motion controller ignores it.
    Unrecognized,
}

impl Action {
    pub fn from_token(token: &str) -> Self {
        match token {
            "STOP" => Action::Stop,
            "FORWARD" => Action::Forward,
            "BACKWARD" => Action::Backward,
            "LEFT" => Action::Left,
            "RIGHT" => Action::Right,
            "FORWARDLEFT" => Action::ForwardLeft,
            "FORWARDRIGHT" => Action::ForwardRight,
            "BACKWARDLEFT" => Action::BackwardLeft,
            "BACKWARDRIGHT" => Action::BackwardRight,
            "SERVO" => Action::Servo,
            _ => Action::Unrecognized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Stop => "STOP",
            Action::Forward => "FORWARD",
            Action::Backward => "BACKWARD",
            Action::Left => "LEFT",
            Action::Right => "RIGHT",
            Action::ForwardLeft => "FORWARDLEFT",
            Action::ForwardRight => "FORWARDRIGHT",
            Action::BackwardLeft => "BACKWARDLEFT",
            Action::BackwardRight => "BACKWARDRIGHT",
            Action::Servo => "SERVO",
            Action::Unrecognized => "UNRECOGNIZED",
        }
    }
}

/// Last decoded `(action, magnitude)` pair.
///
/// `magnitude` is a servo angle in degrees for [`Action::Servo`] and a speed
/// percentage for every motion action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedCommand {
    pub action: Action,
    pub magnitude: u16,
}

impl DecodedCommand {
    pub const STOPPED: DecodedCommand = DecodedCommand {
        action: Action::Stop,
        magnitude: 0,
    };
}

impl Default for DecodedCommand {
    fn default() -> Self {
        Self::STOPPED
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not valid UTF-8.
    Utf8(Utf8Error),
    /// Nothing left after trimming and prefix removal.
    Empty,
    /// Text after the separator is not an unsigned integer.
    Magnitude(ParseIntError),
}

/// Decode a raw payload, carrying the magnitude over from `previous` when absent.
pub fn decode(
    bytes: &[u8],
    previous: DecodedCommand,
) -> Result<DecodedCommand, DecodeError> {
    let text = core::str::from_utf8(bytes).map_err(DecodeError::Utf8)?;
    decode_line(text, previous)
}

/// Decode one text line.
pub fn decode_line(
    line: &str,
    previous: DecodedCommand,
) -> Result<DecodedCommand, DecodeError> {
    let line = line.trim();
    let body = if line.starts_with(COMMAND_PREFIX) {
        &line[PREFIX_STRIP_LEN..]
    } else {
        line
    };
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }

    match body.split_once(MAGNITUDE_SEPARATOR) {
        None => Ok(DecodedCommand {
            action: Action::from_token(body),
            magnitude: previous.magnitude,
        }),
        Some((action, magnitude)) => {
            let magnitude = magnitude
                .trim()
                .parse::<u16>()
                .map_err(DecodeError::Magnitude)?;
            Ok(DecodedCommand {
                action: Action::from_token(action),
                magnitude,
            })
        }
    }
}

#[derive(Clone, Copy)]
struct Slot {
    command: DecodedCommand,
    fresh: bool,
}

/// Single-slot, last-write-wins handoff between the receive context and the
/// control loop.
pub struct CommandMailbox<M: RawMutex> {
    slot: Mutex<M, Cell<Slot>>,
}

impl<M: RawMutex> CommandMailbox<M> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(Slot {
                command: DecodedCommand::STOPPED,
                fresh: false,
            })),
        }
    }

    /// Replace the stored command and mark it fresh.
    pub fn post(
        &self,
        command: DecodedCommand,
    ) {
        self.slot.lock(|slot| {
            slot.set(Slot {
                command,
                fresh: true,
            })
        });
    }

    /// Read-modify-write under the lock; the slot is left untouched on error.
    pub fn update<F, E>(
        &self,
        f: F,
    ) -> Result<DecodedCommand, E>
    where
        F: FnOnce(DecodedCommand) -> Result<DecodedCommand, E>,
    {
        self.slot.lock(|slot| {
            let command = f(slot.get().command)?;
            slot.set(Slot {
                command,
                fresh: true,
            });
            Ok(command)
        })
    }

    /// Current command without touching the fresh flag.
    pub fn latest(&self) -> DecodedCommand {
        self.slot.lock(|slot| slot.get().command)
    }

    /// Current command plus whether it arrived since the previous `take`.
    pub fn take(&self) -> (DecodedCommand, bool) {
        self.slot.lock(|slot| {
            let current = slot.get();
            slot.set(Slot {
                fresh: false,
                ..current
            });
            (current.command, current.fresh)
        })
    }

    pub fn is_fresh(&self) -> bool {
        self.slot.lock(|slot| slot.get().fresh)
    }
}

impl<M: RawMutex> Default for CommandMailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive handler that turns buffered bytes into mailbox updates.
pub struct CommandDecoder<'a, M: RawMutex> {
    mailbox: &'a CommandMailbox<M>,
}

impl<'a, M: RawMutex> CommandDecoder<'a, M> {
    pub fn new(mailbox: &'a CommandMailbox<M>) -> Self {
        Self { mailbox }
    }

    pub fn mailbox(&self) -> &'a CommandMailbox<M> {
        self.mailbox
    }
}

impl<M: RawMutex, const N: usize> RxHandler<N> for CommandDecoder<'_, M> {
    fn on_rx(
        &mut self,
        rx: &mut RxBuffer<N>,
    ) {
        let payload = rx.read(None);
        match self.mailbox.update(|previous| decode(&payload, previous)) {
            Ok(command) => tracing::info!(
                action = command.action.as_str(),
                magnitude = command.magnitude,
                "command received"
            ),
            Err(error) => tracing::warn!(?error, "failed to decode command"),
        }
    }
}
