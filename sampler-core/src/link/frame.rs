//! Serial framing between the MCU and the radio co-processor.
//!
//! Every frame is `SYNC tag len payload[len] check`, where `check` is the XOR
//! of `tag`, `len` and the payload bytes. The decoder is byte-driven so the
//! UART task can feed it whatever chunk the driver hands back, and it resyncs
//! on the next `SYNC` byte after any malformed frame.

use heapless::Vec;

use super::{CharacteristicId, ConnectionHandle};

/// Start-of-frame marker.
pub const SYNC: u8 = 0xA5;

/// Largest payload a frame may carry.
pub const MAX_FRAME_PAYLOAD: usize = 24;

/// Largest encoded frame, header and check byte included.
pub const MAX_FRAME_LEN: usize = MAX_FRAME_PAYLOAD + 4;

/// Largest notification value the co-processor accepts.
pub const MAX_NOTIFY_VALUE: usize = MAX_FRAME_PAYLOAD - 3;

const TAG_CONNECTION_OPENED: u8 = 0x01;
const TAG_CONNECTION_CLOSED: u8 = 0x02;
const TAG_SUBSCRIPTION: u8 = 0x03;
const TAG_NOTIFY: u8 = 0x81;

/// Events reported by the co-processor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkEvent {
    ConnectionOpened(ConnectionHandle),
    ConnectionClosed(ConnectionHandle),
    Subscription {
        characteristic: CharacteristicId,
        enabled: bool,
    },
}

/// Commands sent to the co-processor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LinkCommand {
    Notify {
        connection: ConnectionHandle,
        characteristic: CharacteristicId,
        value: Vec<u8, MAX_NOTIFY_VALUE>,
    },
}

/// Framing failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// The declared length exceeds [`MAX_FRAME_PAYLOAD`].
    Oversized(u8),
    /// The check byte did not match.
    Checksum { expected: u8, actual: u8 },
    /// A well-formed frame carried an unknown tag or a payload of the wrong size.
    Unrecognized(u8),
    /// The output buffer or value is too large for the frame.
    Capacity,
}

impl LinkEvent {
    /// Writes the event as a complete frame into `out`.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        match *self {
            LinkEvent::ConnectionOpened(handle) => {
                write_frame(TAG_CONNECTION_OPENED, &[handle.0], out)
            }
            LinkEvent::ConnectionClosed(handle) => {
                write_frame(TAG_CONNECTION_CLOSED, &[handle.0], out)
            }
            LinkEvent::Subscription {
                characteristic,
                enabled,
            } => {
                let [hi, lo] = characteristic.0.to_be_bytes();
                write_frame(TAG_SUBSCRIPTION, &[hi, lo, u8::from(enabled)], out)
            }
        }
    }

    fn parse(tag: u8, payload: &[u8]) -> Result<Self, FrameError> {
        match (tag, payload) {
            (TAG_CONNECTION_OPENED, &[handle]) => {
                Ok(LinkEvent::ConnectionOpened(ConnectionHandle(handle)))
            }
            (TAG_CONNECTION_CLOSED, &[handle]) => {
                Ok(LinkEvent::ConnectionClosed(ConnectionHandle(handle)))
            }
            (TAG_SUBSCRIPTION, &[hi, lo, flags]) => Ok(LinkEvent::Subscription {
                characteristic: CharacteristicId(u16::from_be_bytes([hi, lo])),
                enabled: flags & 0x01 != 0,
            }),
            _ => Err(FrameError::Unrecognized(tag)),
        }
    }
}

impl LinkCommand {
    /// Builds a notification command, rejecting oversized values.
    pub fn notify(
        connection: ConnectionHandle,
        characteristic: CharacteristicId,
        value: &[u8],
    ) -> Result<Self, FrameError> {
        let value = Vec::from_slice(value).map_err(|_| FrameError::Capacity)?;
        Ok(LinkCommand::Notify {
            connection,
            characteristic,
            value,
        })
    }

    /// Writes the command as a complete frame into `out`.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        match self {
            LinkCommand::Notify {
                connection,
                characteristic,
                value,
            } => {
                let mut payload: Vec<u8, MAX_FRAME_PAYLOAD> = Vec::new();
                let [hi, lo] = characteristic.0.to_be_bytes();
                if payload.extend_from_slice(&[connection.0, hi, lo]).is_err()
                    || payload.extend_from_slice(value).is_err()
                {
                    return Err(FrameError::Capacity);
                }
                write_frame(TAG_NOTIFY, &payload, out)
            }
        }
    }

    fn parse(tag: u8, payload: &[u8]) -> Result<Self, FrameError> {
        match (tag, payload) {
            (TAG_NOTIFY, &[handle, hi, lo, ref value @ ..]) => Self::notify(
                ConnectionHandle(handle),
                CharacteristicId(u16::from_be_bytes([hi, lo])),
                value,
            ),
            _ => Err(FrameError::Unrecognized(tag)),
        }
    }
}

fn write_frame(tag: u8, payload: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
    let len = u8::try_from(payload.len())
        .ok()
        .filter(|&len| usize::from(len) <= MAX_FRAME_PAYLOAD)
        .ok_or(FrameError::Capacity)?;
    let total = payload.len() + 4;
    let frame = out.get_mut(..total).ok_or(FrameError::Capacity)?;

    frame[0] = SYNC;
    frame[1] = tag;
    frame[2] = len;
    frame[3..3 + payload.len()].copy_from_slice(payload);
    frame[total - 1] = checksum(tag, len, payload);
    Ok(total)
}

fn checksum(tag: u8, len: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(tag ^ len, |acc, byte| acc ^ byte)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum DecodeState {
    Sync,
    Tag,
    Len { tag: u8 },
    Payload { tag: u8, len: u8 },
    Check { tag: u8, len: u8 },
}

/// Incremental frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    payload: Vec<u8, MAX_FRAME_PAYLOAD>,
}

impl FrameDecoder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: DecodeState::Sync,
            payload: Vec::new(),
        }
    }

    /// Feeds one byte; yields a verified `(tag, payload)` frame when complete.
    pub fn push(&mut self, byte: u8) -> Option<Result<(u8, &[u8]), FrameError>> {
        match self.state {
            DecodeState::Sync => {
                if byte == SYNC {
                    self.state = DecodeState::Tag;
                }
                None
            }
            DecodeState::Tag => {
                self.payload.clear();
                self.state = DecodeState::Len { tag: byte };
                None
            }
            DecodeState::Len { tag } => {
                if usize::from(byte) > MAX_FRAME_PAYLOAD {
                    self.state = DecodeState::Sync;
                    return Some(Err(FrameError::Oversized(byte)));
                }
                self.state = if byte == 0 {
                    DecodeState::Check { tag, len: 0 }
                } else {
                    DecodeState::Payload { tag, len: byte }
                };
                None
            }
            DecodeState::Payload { tag, len } => {
                // Capacity was checked against `len` above.
                let _ = self.payload.push(byte);
                if self.payload.len() == usize::from(len) {
                    self.state = DecodeState::Check { tag, len };
                }
                None
            }
            DecodeState::Check { tag, len } => {
                self.state = DecodeState::Sync;
                let expected = checksum(tag, len, &self.payload);
                if expected == byte {
                    Some(Ok((tag, self.payload.as_slice())))
                } else {
                    Some(Err(FrameError::Checksum {
                        expected,
                        actual: byte,
                    }))
                }
            }
        }
    }

    /// Feeds one byte and parses complete frames as co-processor events.
    pub fn push_event(&mut self, byte: u8) -> Option<Result<LinkEvent, FrameError>> {
        self.push(byte)
            .map(|frame| frame.and_then(|(tag, payload)| LinkEvent::parse(tag, payload)))
    }

    /// Feeds one byte and parses complete frames as MCU commands.
    pub fn push_command(&mut self, byte: u8) -> Option<Result<LinkCommand, FrameError>> {
        self.push(byte)
            .map(|frame| frame.and_then(|(tag, payload)| LinkCommand::parse(tag, payload)))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_events(bytes: &[u8]) -> heapless::Vec<Result<LinkEvent, FrameError>, 8> {
        let mut decoder = FrameDecoder::new();
        bytes
            .iter()
            .filter_map(|&byte| decoder.push_event(byte))
            .collect()
    }

    #[test]
    fn notify_frame_layout() {
        let command = LinkCommand::notify(
            ConnectionHandle(4),
            CharacteristicId::AVERAGE_VOLTAGE,
            &[0x06, 0x72],
        )
        .unwrap();
        let mut out = [0u8; MAX_FRAME_LEN];
        let len = command.encode(&mut out).unwrap();

        assert_eq!(
            &out[..len],
            &[SYNC, 0x81, 5, 0x04, 0x00, 0x1A, 0x06, 0x72, 0x81 ^ 5 ^ 0x04 ^ 0x1A ^ 0x06 ^ 0x72]
        );
    }

    #[test]
    fn decoder_skips_noise_and_reports_events() {
        let mut stream: heapless::Vec<u8, 32> = heapless::Vec::new();
        stream.extend_from_slice(&[0x00, 0xFF]).unwrap();
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = LinkEvent::Subscription {
            characteristic: CharacteristicId::AVERAGE_VOLTAGE,
            enabled: true,
        }
        .encode(&mut frame)
        .unwrap();
        stream.extend_from_slice(&frame[..len]).unwrap();

        let events = decode_events(&stream);
        assert_eq!(
            events.as_slice(),
            &[Ok(LinkEvent::Subscription {
                characteristic: CharacteristicId::AVERAGE_VOLTAGE,
                enabled: true,
            })]
        );
    }

    #[test]
    fn corrupted_check_byte_is_reported_then_decoder_resyncs() {
        let mut frame = [0u8; MAX_FRAME_LEN];
        let len = LinkEvent::ConnectionOpened(ConnectionHandle(1))
            .encode(&mut frame)
            .unwrap();
        let mut stream: heapless::Vec<u8, 32> = heapless::Vec::new();
        stream.extend_from_slice(&frame[..len]).unwrap();
        stream[len - 1] ^= 0xFF;
        stream.extend_from_slice(&frame[..len]).unwrap();

        let events = decode_events(&stream);
        assert!(matches!(events[0], Err(FrameError::Checksum { .. })));
        assert_eq!(
            events[1],
            Ok(LinkEvent::ConnectionOpened(ConnectionHandle(1)))
        );
    }

    #[test]
    fn oversized_length_is_rejected() {
        let events = decode_events(&[SYNC, TAG_NOTIFY, 0xF0]);
        assert_eq!(events.as_slice(), &[Err(FrameError::Oversized(0xF0))]);
    }

    #[test]
    fn unknown_tag_is_unrecognized() {
        let events = decode_events(&[SYNC, 0x7E, 0, 0x7E]);
        assert_eq!(events.as_slice(), &[Err(FrameError::Unrecognized(0x7E))]);
    }

    #[test]
    fn oversized_notify_value_is_refused() {
        let value = [0u8; MAX_NOTIFY_VALUE + 1];
        assert_eq!(
            LinkCommand::notify(ConnectionHandle(0), CharacteristicId(1), &value),
            Err(FrameError::Capacity)
        );
    }
}
