// SCSI sense data parsing (SPC fixed and descriptor formats)

const RESPONSE_CODE_MASK: u8 = 0x7f;
const SENSE_KEY_MASK: u8 = 0x0f;

/// Sense data response format, from byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseFormat {
    FixedCurrent,
    FixedDeferred,
    DescriptorCurrent,
    DescriptorDeferred,
    Unknown(u8),
}

impl From<u8> for SenseFormat {
    fn from(byte0: u8) -> Self {
        match byte0 & RESPONSE_CODE_MASK {
            0x70 => SenseFormat::FixedCurrent,
            0x71 => SenseFormat::FixedDeferred,
            0x72 => SenseFormat::DescriptorCurrent,
            0x73 => SenseFormat::DescriptorDeferred,
            other => SenseFormat::Unknown(other),
        }
    }
}

/// Key / additional code / qualifier / field-replaceable-unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenseFields {
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
    pub fru: u8,
}

/// Extract the sense key and additional codes.
///
/// Bytes beyond the end of `sense` read as zero, so short buffers never fault.
/// Unknown response codes yield all-zero fields.
pub fn parse_sense(sense: &[u8]) -> SenseFields {
    let byte = |i: usize| sense.get(i).copied().unwrap_or(0);

    match SenseFormat::from(byte(0)) {
        SenseFormat::FixedCurrent | SenseFormat::FixedDeferred => SenseFields {
            sense_key: byte(2) & SENSE_KEY_MASK,
            asc: byte(12),
            ascq: byte(13),
            fru: byte(14),
        },
        SenseFormat::DescriptorCurrent | SenseFormat::DescriptorDeferred => SenseFields {
            sense_key: byte(1) & SENSE_KEY_MASK,
            asc: byte(2),
            ascq: byte(3),
            fru: 0,
        },
        SenseFormat::Unknown(_) => SenseFields::default(),
    }
}

/// Short name of a sense key, for diagnostics
pub fn sense_key_name(key: u8) -> &'static str {
    match key & SENSE_KEY_MASK {
        0x0 => "NO SENSE",
        0x1 => "RECOVERED ERROR",
        0x2 => "NOT READY",
        0x3 => "MEDIUM ERROR",
        0x4 => "HARDWARE ERROR",
        0x5 => "ILLEGAL REQUEST",
        0x6 => "UNIT ATTENTION",
        0x7 => "DATA PROTECT",
        0x8 => "BLANK CHECK",
        0x9 => "VENDOR SPECIFIC",
        0xa => "COPY ABORTED",
        0xb => "ABORTED COMMAND",
        0xd => "VOLUME OVERFLOW",
        0xe => "MISCOMPARE",
        _ => "RESERVED",
    }
}
