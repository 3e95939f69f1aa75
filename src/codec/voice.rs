//! Binary voice frame codec
//!
//! Frame layout (all integers little-endian):
//!
//! ```text
//! ┌────────┬────────┬────────┬──────────────┬────────┬──────────┬────────────────┬─────────┐
//! │ total  │ audio  │ tx     │ sender id    │ unit   │ sequence │ tx triples     │ audio   │
//! │ len u16│ len u16│ len u16│ 22 x ASCII   │ id u32 │ u64      │ n x 10 bytes   │ payload │
//! └────────┴────────┴────────┴──────────────┴────────┴──────────┴────────────────┴─────────┘
//!   0        2        4        6              28       32         40
//! ```
//!
//! Each transmit triple is `f64 frequency | u8 modulation | u8 encryption key`.
//! The total length includes its own two bytes, so a reader can take the
//! prefix and then read exactly `total - 2` more bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::radio::Modulation;

/// Length of the ASCII sender id
pub const SENDER_ID_LENGTH: usize = 22;

/// Length of the length prefix alone
pub const LENGTH_PREFIX: usize = 2;

/// Fixed header: three u16 lengths, sender id, unit id, sequence
pub const HEADER_LENGTH: usize = 6 + SENDER_ID_LENGTH + 4 + 8;

/// One transmit triple
pub const TRIPLE_LENGTH: usize = 10;

/// Anything shorter cannot carry a single transmit channel
pub const MIN_FRAME_LENGTH: usize = HEADER_LENGTH + TRIPLE_LENGTH;

/// Largest frame the u16 prefix can describe
pub const MAX_FRAME_LENGTH: usize = u16::MAX as usize;

/// One channel the sender is transmitting on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmitChannel {
    pub frequency: f64,
    pub modulation: Modulation,
    /// Encryption key, 0 when clear
    pub encryption: u8,
}

impl TransmitChannel {
    pub fn new(frequency: f64, modulation: Modulation, encryption: u8) -> Self {
        Self {
            frequency,
            modulation,
            encryption,
        }
    }
}

/// One voice packet on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceFrame {
    pub sender_id: String,
    pub unit_id: u32,
    pub sequence: u64,
    pub channels: Vec<TransmitChannel>,
    pub audio: Bytes,
}

impl VoiceFrame {
    /// Frame sent right after connecting so the server learns our address
    pub fn probe(sender_id: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            unit_id: 1,
            sequence: 1,
            channels: vec![TransmitChannel::new(100.0, Modulation::HaveQuick, 0)],
            audio: Bytes::from_static(&[0, 1, 2, 3, 4, 5]),
        }
    }

    /// No-op frame sent periodically while idle
    pub fn keepalive(sender_id: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            unit_id: 1,
            sequence: 1,
            channels: vec![TransmitChannel::new(100.0, Modulation::HaveQuick, 0)],
            audio: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]),
        }
    }

    /// Size of this frame once encoded
    pub fn encoded_len(&self) -> usize {
        HEADER_LENGTH + self.channels.len() * TRIPLE_LENGTH + self.audio.len()
    }

    /// Encode into a length-prefixed frame
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        validate_sender_id(self.sender_id.as_bytes())?;

        if self.channels.is_empty() {
            return Err(CodecError::NoTransmitChannels);
        }

        let total = self.encoded_len();
        if total > MAX_FRAME_LENGTH {
            return Err(CodecError::FrameTooLarge(total));
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16_le(total as u16);
        buf.put_u16_le(self.audio.len() as u16);
        buf.put_u16_le((self.channels.len() * TRIPLE_LENGTH) as u16);
        buf.put_slice(self.sender_id.as_bytes());
        buf.put_u32_le(self.unit_id);
        buf.put_u64_le(self.sequence);

        for channel in &self.channels {
            buf.put_f64_le(channel.frequency);
            buf.put_u8(channel.modulation.into());
            buf.put_u8(channel.encryption);
        }

        buf.put_slice(&self.audio);
        Ok(buf.freeze())
    }

    /// Decode a complete frame, length prefix included
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < MIN_FRAME_LENGTH {
            return Err(CodecError::Truncated(data.len()));
        }

        let mut buf = data;
        let total = buf.get_u16_le() as usize;
        if total != data.len() {
            return Err(CodecError::LengthMismatch {
                declared: total,
                actual: data.len(),
            });
        }

        let audio_len = buf.get_u16_le() as usize;
        let tx_len = buf.get_u16_le() as usize;

        if tx_len == 0 {
            return Err(CodecError::NoTransmitChannels);
        }
        if tx_len % TRIPLE_LENGTH != 0 {
            return Err(CodecError::InvalidTransmitSection(tx_len));
        }
        if HEADER_LENGTH + tx_len + audio_len != total {
            return Err(CodecError::LengthMismatch {
                declared: HEADER_LENGTH + tx_len + audio_len,
                actual: total,
            });
        }

        let id_bytes = &buf[..SENDER_ID_LENGTH];
        validate_sender_id(id_bytes)?;
        let sender_id = String::from_utf8_lossy(id_bytes).into_owned();
        buf.advance(SENDER_ID_LENGTH);

        let unit_id = buf.get_u32_le();
        let sequence = buf.get_u64_le();

        let mut channels = Vec::with_capacity(tx_len / TRIPLE_LENGTH);
        for _ in 0..tx_len / TRIPLE_LENGTH {
            let frequency = buf.get_f64_le();
            let modulation = Modulation::try_from(buf.get_u8())?;
            let encryption = buf.get_u8();
            channels.push(TransmitChannel {
                frequency,
                modulation,
                encryption,
            });
        }

        let audio = Bytes::copy_from_slice(&buf[..audio_len]);

        Ok(Self {
            sender_id,
            unit_id,
            sequence,
            channels,
            audio,
        })
    }
}

fn validate_sender_id(id: &[u8]) -> Result<(), CodecError> {
    if id.len() != SENDER_ID_LENGTH || !id.iter().all(|b| b.is_ascii_graphic()) {
        return Err(CodecError::InvalidSenderId(
            String::from_utf8_lossy(id).into_owned(),
        ));
    }
    Ok(())
}
