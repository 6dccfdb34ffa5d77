//! Frame encoding/decoding for the tunnel protocol
//!
//! Data frame format:
//! ```text
//! +--------+--------+--------+--------+
//! |  Type  |      Stream ID (3B)      |
//! +--------+--------+--------+--------+
//! |      Length (2B)         | Payload ...
//! +--------+--------+--------+--------+
//! ```
//!
//! Control frames carry only the 4-byte header. The ACK frame repurposes
//! the length field for its unsigned 16-bit frame count. All multi-byte
//! fields are big-endian.

use super::{TunnelError, MAX_DATA_LEN, MAX_STREAM_ID};
use bytes::{BufMut, BytesMut};

/// Size of the header preceding a data payload
pub const DATA_HEADER_LEN: usize = 6;

/// Size of a control frame header (and of an RST frame in its entirety)
pub const CONTROL_HEADER_LEN: usize = 4;

/// Size of an ACK frame: control header plus the 16-bit count
pub const ACK_FRAME_LEN: usize = 6;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Stream payload
    Data = 0x00,
    /// Window credit from receiver to sender
    Ack = 0x01,
    /// Stream termination
    Rst = 0x02,
}

impl TryFrom<u8> for FrameType {
    type Error = TunnelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FrameType::Data),
            0x01 => Ok(FrameType::Ack),
            0x02 => Ok(FrameType::Rst),
            _ => Err(TunnelError::Protocol(format!(
                "unknown frame type: {}",
                value
            ))),
        }
    }
}

/// Build the 4-byte header shared by every frame on a stream.
///
/// Byte 0 is the type (initialized to data); emitters overwrite it per
/// frame. Bytes 1-3 are the big-endian stream id.
pub fn default_header(stream_id: u32) -> [u8; CONTROL_HEADER_LEN] {
    debug_assert!(stream_id <= MAX_STREAM_ID);
    [
        FrameType::Data as u8,
        (stream_id >> 16) as u8,
        (stream_id >> 8) as u8,
        stream_id as u8,
    ]
}

/// Encode a data frame: header, 2-byte length, payload.
pub fn encode_data(
    header: &[u8; CONTROL_HEADER_LEN],
    payload: &[u8],
) -> Result<BytesMut, TunnelError> {
    if payload.is_empty() || payload.len() > MAX_DATA_LEN {
        return Err(TunnelError::Protocol(format!(
            "invalid data length: {}",
            payload.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(DATA_HEADER_LEN + payload.len());
    buf.put_u8(FrameType::Data as u8);
    buf.extend_from_slice(&header[1..]);
    buf.put_u16(payload.len() as u16);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode a header-only control frame (RST).
pub fn encode_control(
    frame_type: FrameType,
    header: &[u8; CONTROL_HEADER_LEN],
) -> [u8; CONTROL_HEADER_LEN] {
    let mut frame = *header;
    frame[0] = frame_type as u8;
    frame
}

/// Encode an ACK frame carrying a window credit count.
pub fn encode_ack(header: &[u8; CONTROL_HEADER_LEN], frames: u16) -> [u8; ACK_FRAME_LEN] {
    let mut frame = [0u8; ACK_FRAME_LEN];
    frame[0] = FrameType::Ack as u8;
    frame[1..4].copy_from_slice(&header[1..]);
    frame[4..6].copy_from_slice(&frames.to_be_bytes());
    frame
}

/// Decode a 4-byte frame header into its type and stream id.
pub fn decode_header(buf: &[u8; CONTROL_HEADER_LEN]) -> Result<(FrameType, u32), TunnelError> {
    let frame_type = FrameType::try_from(buf[0])?;
    let stream_id = ((buf[1] as u32) << 16) | ((buf[2] as u32) << 8) | (buf[3] as u32);
    Ok((frame_type, stream_id))
}

/// Validate the 2-byte length field of a data frame.
pub fn decode_data_len(buf: &[u8; 2]) -> Result<usize, TunnelError> {
    let len = u16::from_be_bytes(*buf) as usize;
    if len == 0 || len > MAX_DATA_LEN {
        return Err(TunnelError::Protocol(format!("invalid data length: {}", len)));
    }
    Ok(len)
}

/// Validate the 2-byte count field of an ACK frame.
///
/// The count is unsigned; a value with the sign bit set is rejected.
pub fn decode_ack_count(buf: &[u8; 2]) -> Result<usize, TunnelError> {
    let count = u16::from_be_bytes(*buf);
    if count & 0x8000 != 0 {
        return Err(TunnelError::Protocol(format!(
            "negative ack count: {}",
            count as i16
        )));
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_frame_roundtrip() {
        let header = default_header(0x0A0B0C);
        let payload = b"Hello, World!";
        let frame = encode_data(&header, payload).unwrap();

        assert_eq!(frame.len(), DATA_HEADER_LEN + payload.len());

        let mut head = [0u8; CONTROL_HEADER_LEN];
        head.copy_from_slice(&frame[..CONTROL_HEADER_LEN]);
        let (frame_type, stream_id) = decode_header(&head).unwrap();
        assert_eq!(frame_type, FrameType::Data);
        assert_eq!(stream_id, 0x0A0B0C);

        let len = decode_data_len(&[frame[4], frame[5]]).unwrap();
        assert_eq!(len, payload.len());
        assert_eq!(&frame[DATA_HEADER_LEN..], payload);
    }

    #[test]
    fn test_data_length_bounds() {
        let header = default_header(1);
        assert!(encode_data(&header, &[]).is_err());
        assert!(encode_data(&header, &vec![0u8; MAX_DATA_LEN]).is_ok());
        assert!(encode_data(&header, &vec![0u8; MAX_DATA_LEN + 1]).is_err());

        assert!(decode_data_len(&0u16.to_be_bytes()).is_err());
        assert!(decode_data_len(&(MAX_DATA_LEN as u16).to_be_bytes()).is_ok());
        assert!(decode_data_len(&(MAX_DATA_LEN as u16 + 1).to_be_bytes()).is_err());
    }

    #[test]
    fn test_ack_frame_roundtrip() {
        let header = default_header(7);
        let frame = encode_ack(&header, 42);

        let mut head = [0u8; CONTROL_HEADER_LEN];
        head.copy_from_slice(&frame[..CONTROL_HEADER_LEN]);
        let (frame_type, stream_id) = decode_header(&head).unwrap();
        assert_eq!(frame_type, FrameType::Ack);
        assert_eq!(stream_id, 7);
        assert_eq!(decode_ack_count(&[frame[4], frame[5]]).unwrap(), 42);
    }

    #[test]
    fn test_negative_ack_count_rejected() {
        let err = decode_ack_count(&0x8001u16.to_be_bytes()).unwrap_err();
        assert!(matches!(err, TunnelError::Protocol(_)));
    }

    #[test]
    fn test_rst_is_header_only() {
        let header = default_header(MAX_STREAM_ID);
        let frame = encode_control(FrameType::Rst, &header);
        assert_eq!(frame.len(), CONTROL_HEADER_LEN);

        let (frame_type, stream_id) = decode_header(&frame).unwrap();
        assert_eq!(frame_type, FrameType::Rst);
        assert_eq!(stream_id, MAX_STREAM_ID);
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let err = decode_header(&[9, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, TunnelError::Protocol(_)));
    }
}
