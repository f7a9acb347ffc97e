//! SocketCAN wire format codec
//!
//! Maps between the raw `struct can_frame` / `struct canfd_frame` bytes that
//! a CAN_RAW socket reads and writes, and the canonical [`Frame`].
//!
//! ## Wire layout
//! ```text
//! offset  size  can_frame (16 bytes)   canfd_frame (72 bytes)
//! 0       4     can_id + flags         can_id + flags
//! 4       1     len                    len
//! 5       1     __pad                  flags (BRS, ESI)
//! 6       1     __res0                 __res0
//! 7       1     len8_dlc               __res1
//! 8       8/64  data                   data
//! ```
//! `can_id` is stored in host byte order.

use byteorder::{ByteOrder, NativeEndian};

use crate::types::{Frame, FrameKind, FrameSpec, Result, SimError, CANFD_MAX_DLEN, CAN_MAX_DLEN};

/// Size of `struct can_frame`
pub const CAN_MTU: usize = 16;

/// Size of `struct canfd_frame`
pub const CANFD_MTU: usize = 72;

/// Extended frame format flag (0 = standard 11 bit, 1 = extended 29 bit)
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error message frame flag
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

/// Valid bits of a standard frame identifier
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Valid bits of an extended frame identifier
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Bit rate switch (second bitrate for payload data)
pub const CANFD_BRS: u8 = 0x01;
/// Error state indicator of the transmitting node
pub const CANFD_ESI: u8 = 0x02;

const ID_OFFSET: usize = 0;
const LEN_OFFSET: usize = 4;
const FD_FLAGS_OFFSET: usize = 5;
const LEN8_DLC_OFFSET: usize = 7;
const DATA_OFFSET: usize = 8;

/// Encoded frame, ready to be written to the socket
#[derive(Clone, PartialEq, Eq)]
pub struct WireFrame {
    buf: [u8; CANFD_MTU],
    len: usize,
}

impl WireFrame {
    /// The bytes to write (exactly one MTU)
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Number of bytes to write
    pub fn len(&self) -> usize {
        self.len
    }

    /// Never true for an encoded frame
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Kind implied by the byte count
    pub fn kind(&self) -> FrameKind {
        if self.len == CANFD_MTU {
            FrameKind::Fd
        } else {
            FrameKind::Classic
        }
    }
}

impl std::fmt::Debug for WireFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireFrame")
            .field("len", &self.len)
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

/// `len8_dlc` is only meaningful as 9..15 on a full 8 byte classic frame
fn legacy_dlc(len: usize, dlc: u8) -> Option<u8> {
    (len == CAN_MAX_DLEN && (9..=15).contains(&dlc)).then_some(dlc)
}

/// True if `count` is a byte count a CAN_RAW socket can legitimately transfer
pub fn is_valid_mtu(count: usize) -> bool {
    count == CAN_MTU || count == CANFD_MTU
}

/// Decode raw socket bytes into a [`Frame`]
///
/// `raw` must hold exactly the bytes returned by the read; the byte count
/// selects the frame kind. The timestamp is attached as-is.
pub fn decode(raw: &[u8], timestamp_ns: Option<u64>) -> Result<Frame> {
    let kind = match raw.len() {
        CAN_MTU => FrameKind::Classic,
        CANFD_MTU => FrameKind::Fd,
        other => {
            return Err(SimError::InvalidFrame(format!(
                "unexpected frame size {} (expected {} or {})",
                other, CAN_MTU, CANFD_MTU
            )))
        }
    };

    let can_id = NativeEndian::read_u32(&raw[ID_OFFSET..LEN_OFFSET]);
    let extended = can_id & CAN_EFF_FLAG != 0;
    let id = can_id & if extended { CAN_EFF_MASK } else { CAN_SFF_MASK };

    let len = raw[LEN_OFFSET] as usize;
    if len > kind.max_len() {
        return Err(SimError::InvalidFrame(format!(
            "{} frame 0x{:X} claims {} payload bytes (max {})",
            kind,
            id,
            len,
            kind.max_len()
        )));
    }

    let (brs, esi, legacy_dlc) = match kind {
        FrameKind::Fd => {
            let flags = raw[FD_FLAGS_OFFSET];
            (flags & CANFD_BRS != 0, flags & CANFD_ESI != 0, None)
        }
        FrameKind::Classic => (false, false, legacy_dlc(len, raw[LEN8_DLC_OFFSET])),
    };

    Ok(Frame {
        kind,
        id,
        extended,
        remote: can_id & CAN_RTR_FLAG != 0,
        error: can_id & CAN_ERR_FLAG != 0,
        brs,
        esi,
        legacy_dlc,
        payload: raw[DATA_OFFSET..DATA_OFFSET + len].to_vec(),
        timestamp_ns,
    })
}

/// Encode a transmit request into socket bytes
///
/// - A payload longer than 8 bytes promotes the frame to CAN-FD.
/// - An identifier outside the standard range sets the extended flag even if
///   it was not requested; the identifier is then masked to 29 bits.
/// - FD-only flags are dropped from classic frames, the legacy DLC from FD
///   frames and from classic frames that do not carry 8 bytes. Values
///   outside 9..15 are dropped as well.
pub fn encode(spec: &FrameSpec) -> Result<WireFrame> {
    let len = spec.payload.len();
    if len > CANFD_MAX_DLEN {
        return Err(SimError::InvalidFrame(format!(
            "payload of {} bytes exceeds the CAN-FD maximum of {}",
            len, CANFD_MAX_DLEN
        )));
    }

    let kind = if len > FrameKind::Classic.max_len() {
        FrameKind::Fd
    } else {
        spec.kind
    };

    let extended = spec.extended || spec.id & !CAN_SFF_MASK != 0;
    let mut can_id = if extended {
        (spec.id & CAN_EFF_MASK) | CAN_EFF_FLAG
    } else {
        spec.id & CAN_SFF_MASK
    };
    if spec.remote {
        can_id |= CAN_RTR_FLAG;
    }
    if spec.error {
        can_id |= CAN_ERR_FLAG;
    }

    let mut buf = [0u8; CANFD_MTU];
    NativeEndian::write_u32(&mut buf[ID_OFFSET..LEN_OFFSET], can_id);
    buf[LEN_OFFSET] = len as u8;
    buf[DATA_OFFSET..DATA_OFFSET + len].copy_from_slice(&spec.payload);

    let mtu = match kind {
        FrameKind::Fd => {
            let mut flags = 0;
            if spec.brs {
                flags |= CANFD_BRS;
            }
            if spec.esi {
                flags |= CANFD_ESI;
            }
            buf[FD_FLAGS_OFFSET] = flags;
            CANFD_MTU
        }
        FrameKind::Classic => {
            if let Some(dlc) = spec.legacy_dlc.and_then(|dlc| legacy_dlc(len, dlc)) {
                buf[LEN8_DLC_OFFSET] = dlc;
            }
            CAN_MTU
        }
    };

    Ok(WireFrame { buf, len: mtu })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_classic(can_id: u32, data: &[u8], len8_dlc: u8) -> Vec<u8> {
        let mut raw = vec![0u8; CAN_MTU];
        NativeEndian::write_u32(&mut raw[0..4], can_id);
        raw[4] = data.len() as u8;
        raw[7] = len8_dlc;
        raw[8..8 + data.len()].copy_from_slice(data);
        raw
    }

    #[test]
    fn test_decode_classic_frame() {
        let raw = raw_classic(0x123, &[0xAA, 0xBB], 0);
        let frame = decode(&raw, None).unwrap();

        assert_eq!(frame.kind, FrameKind::Classic);
        assert_eq!(frame.id, 0x123);
        assert!(!frame.extended);
        assert!(!frame.remote);
        assert!(!frame.error);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.payload, vec![0xAA, 0xBB]);
        assert_eq!(frame.legacy_dlc, None);
    }

    #[test]
    fn test_decode_strips_flag_bits() {
        let raw = raw_classic(0x1234_5678 | CAN_EFF_FLAG | CAN_RTR_FLAG, &[], 0);
        let frame = decode(&raw, Some(42)).unwrap();

        assert!(frame.extended);
        assert!(frame.remote);
        assert_eq!(frame.id, 0x1234_5678);
        assert_eq!(frame.timestamp_ns, Some(42));

        // Standard frames use the 11-bit mask even if junk sits above it
        let raw = raw_classic(0x0001_0123 | CAN_ERR_FLAG, &[], 0);
        let frame = decode(&raw, None).unwrap();
        assert!(!frame.extended);
        assert!(frame.error);
        assert_eq!(frame.id, 0x123);
    }

    #[test]
    fn test_decode_legacy_dlc() {
        let raw = raw_classic(0x100, &[0; 8], 12);
        let frame = decode(&raw, None).unwrap();
        assert_eq!(frame.len(), 8);
        assert_eq!(frame.legacy_dlc, Some(12));
    }

    #[test]
    fn test_decode_ignores_len8_dlc_on_short_frames() {
        // Some senders mirror the length into len8_dlc
        let raw = raw_classic(0x100, &[1, 2], 2);
        assert_eq!(decode(&raw, None).unwrap().legacy_dlc, None);

        let raw = raw_classic(0x100, &[0; 8], 8);
        assert_eq!(decode(&raw, None).unwrap().legacy_dlc, None);

        let raw = raw_classic(0x100, &[0; 8], 16);
        assert_eq!(decode(&raw, None).unwrap().legacy_dlc, None);
    }

    #[test]
    fn test_decode_fd_flags() {
        let mut raw = vec![0u8; CANFD_MTU];
        NativeEndian::write_u32(&mut raw[0..4], 0x42);
        raw[4] = 12;
        raw[5] = CANFD_BRS | CANFD_ESI;
        raw[7] = 9; // __res1, must not leak into legacy_dlc

        let frame = decode(&raw, None).unwrap();
        assert_eq!(frame.kind, FrameKind::Fd);
        assert!(frame.brs);
        assert!(frame.esi);
        assert_eq!(frame.len(), 12);
        assert_eq!(frame.legacy_dlc, None);
    }

    #[test]
    fn test_decode_rejects_bad_sizes() {
        assert!(decode(&[0u8; 15], None).is_err());
        assert!(decode(&[], None).is_err());

        let mut raw = raw_classic(0x1, &[], 0);
        raw[4] = 9;
        assert!(matches!(decode(&raw, None), Err(SimError::InvalidFrame(_))));
    }

    #[test]
    fn test_encode_standard_boundary() {
        let wire = encode(&FrameSpec::new(0x7FF, vec![])).unwrap();
        let frame = decode(wire.as_bytes(), None).unwrap();
        assert!(!frame.extended);
        assert_eq!(frame.id, 0x7FF);

        let wire = encode(&FrameSpec::new(0x800, vec![])).unwrap();
        let frame = decode(wire.as_bytes(), None).unwrap();
        assert!(frame.extended);
        assert_eq!(frame.id, 0x800);
    }

    #[test]
    fn test_encode_promotes_to_fd() {
        let wire = encode(&FrameSpec::new(0x10, vec![0u8; 9])).unwrap();
        assert_eq!(wire.len(), CANFD_MTU);
        assert_eq!(wire.kind(), FrameKind::Fd);

        let wire = encode(&FrameSpec::new(0x10, vec![0u8; 8])).unwrap();
        assert_eq!(wire.len(), CAN_MTU);

        let wire = encode(&FrameSpec::new(0x10, vec![]).with_kind(FrameKind::Fd)).unwrap();
        assert_eq!(wire.len(), CANFD_MTU);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let result = encode(&FrameSpec::new(0x10, vec![0u8; 65]));
        assert!(matches!(result, Err(SimError::InvalidFrame(_))));
    }

    #[test]
    fn test_encode_classic_drops_fd_flags() {
        let spec = FrameSpec::new(0x10, vec![1]).with_fd_flags(true, true);
        let wire = encode(&spec).unwrap();
        assert_eq!(wire.as_bytes()[FD_FLAGS_OFFSET], 0);

        let frame = decode(wire.as_bytes(), None).unwrap();
        assert!(!frame.brs);
        assert!(!frame.esi);
    }

    #[test]
    fn test_encode_legacy_dlc_only_for_full_classic_frames() {
        let wire = encode(&FrameSpec::new(0x10, vec![0; 8]).with_legacy_dlc(12)).unwrap();
        assert_eq!(wire.as_bytes()[LEN8_DLC_OFFSET], 12);

        let wire = encode(&FrameSpec::new(0x10, vec![1]).with_legacy_dlc(12)).unwrap();
        assert_eq!(wire.as_bytes()[LEN8_DLC_OFFSET], 0);

        let wire = encode(&FrameSpec::new(0x10, vec![0; 8]).with_legacy_dlc(7)).unwrap();
        assert_eq!(wire.as_bytes()[LEN8_DLC_OFFSET], 0);

        let spec = FrameSpec::new(0x10, vec![0; 8])
            .with_kind(FrameKind::Fd)
            .with_legacy_dlc(12);
        let wire = encode(&spec).unwrap();
        assert_eq!(wire.as_bytes()[LEN8_DLC_OFFSET], 0);
    }

    #[test]
    fn test_encode_masks_raw_flag_bits_in_id() {
        // Scripts sometimes pass a SocketCAN id with EFF already set
        let wire = encode(&FrameSpec::new(0x8000_0123, vec![])).unwrap();
        let frame = decode(wire.as_bytes(), None).unwrap();
        assert!(frame.extended);
        assert_eq!(frame.id, 0x123);
    }

    #[test]
    fn test_round_trip_normalizes_derived_fields() {
        let specs = vec![
            FrameSpec::new(0x123, vec![0xAA, 0xBB]),
            FrameSpec::new(0x1FFF_FFFF, vec![1, 2, 3]).with_remote(true),
            FrameSpec::new(0x55, vec![]).with_extended(true).with_error(true),
            FrameSpec::new(0x100, vec![0; 8]).with_legacy_dlc(15),
            FrameSpec::new(0x7E0, vec![7; 64])
                .with_kind(FrameKind::Fd)
                .with_fd_flags(true, false),
        ];

        for spec in specs {
            let frame = decode(encode(&spec).unwrap().as_bytes(), None).unwrap();
            let mut expected = spec.clone();
            expected.extended = spec.extended || spec.id > CAN_SFF_MASK;
            if spec.payload.len() > 8 {
                expected.kind = FrameKind::Fd;
            }
            assert_eq!(frame.to_spec(), expected);
        }
    }

    #[test]
    fn test_valid_mtu() {
        assert!(is_valid_mtu(CAN_MTU));
        assert!(is_valid_mtu(CANFD_MTU));
        assert!(!is_valid_mtu(8));
        assert!(!is_valid_mtu(0));
    }
}
