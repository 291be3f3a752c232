// Status fields reported back in sg_io_hdr

use std::fmt;

/// Masked SCSI status byte (`masked_status`, status >> 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskedStatus {
    Good,
    CheckCondition,
    ConditionGood,
    Busy,
    IntermediateGood,
    IntermediateConditionGood,
    ReservationConflict,
    CommandTerminated,
    QueueFull,
    Unknown(u8),
}

impl From<u8> for MaskedStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => MaskedStatus::Good,
            0x01 => MaskedStatus::CheckCondition,
            0x02 => MaskedStatus::ConditionGood,
            0x04 => MaskedStatus::Busy,
            0x08 => MaskedStatus::IntermediateGood,
            0x0a => MaskedStatus::IntermediateConditionGood,
            0x0c => MaskedStatus::ReservationConflict,
            0x11 => MaskedStatus::CommandTerminated,
            0x14 => MaskedStatus::QueueFull,
            other => MaskedStatus::Unknown(other),
        }
    }
}

impl MaskedStatus {
    pub fn description(&self) -> &'static str {
        match self {
            MaskedStatus::Good => "Good",
            MaskedStatus::CheckCondition => "Check Condition",
            MaskedStatus::ConditionGood => "Condition Good",
            MaskedStatus::Busy => "Busy",
            MaskedStatus::IntermediateGood => "Intermediate Good",
            MaskedStatus::IntermediateConditionGood => "Intermediate C Good",
            MaskedStatus::ReservationConflict => "Reservation Conflict",
            MaskedStatus::CommandTerminated => "Command Terminated",
            MaskedStatus::QueueFull => "Queue Full",
            MaskedStatus::Unknown(_) => "Unknown Masked Status",
        }
    }
}

/// Host adapter status (`DID_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Ok,
    NoConnect,
    BusBusy,
    TimeOut,
    BadTarget,
    Abort,
    Parity,
    Error,
    Reset,
    BadInterrupt,
    Passthrough,
    SoftError,
    Unknown(u16),
}

impl From<u16> for HostStatus {
    fn from(value: u16) -> Self {
        match value {
            0x00 => HostStatus::Ok,
            0x01 => HostStatus::NoConnect,
            0x02 => HostStatus::BusBusy,
            0x03 => HostStatus::TimeOut,
            0x04 => HostStatus::BadTarget,
            0x05 => HostStatus::Abort,
            0x06 => HostStatus::Parity,
            0x07 => HostStatus::Error,
            0x08 => HostStatus::Reset,
            0x09 => HostStatus::BadInterrupt,
            0x0a => HostStatus::Passthrough,
            0x0b => HostStatus::SoftError,
            other => HostStatus::Unknown(other),
        }
    }
}

impl HostStatus {
    pub fn description(&self) -> &'static str {
        match self {
            HostStatus::Ok => "No error",
            HostStatus::NoConnect => "Could not connect before timeout period",
            HostStatus::BusBusy => "Bus stayed busy through time out period",
            HostStatus::TimeOut => "Timed out for other reason",
            HostStatus::BadTarget => "Bad target, device not responding",
            HostStatus::Abort => "Told to abort for some other reason",
            HostStatus::Parity => "Parity error",
            HostStatus::Error => "Internal error",
            HostStatus::Reset => "Reset by somebody",
            HostStatus::BadInterrupt => "Got an interrupt we weren't expecting",
            HostStatus::Passthrough => "Force command past mid-layer",
            HostStatus::SoftError => "The low level driver wants a retry",
            HostStatus::Unknown(_) => "Unknown host status",
        }
    }
}

const DRIVER_STATUS_MASK: u16 = 0x0f;
const DRIVER_SUGGEST_MASK: u16 = 0xf0;

/// Driver status, low nibble of `driver_status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Ok,
    Busy,
    Soft,
    Media,
    Error,
    Invalid,
    Timeout,
    Hard,
    Sense,
    Unknown(u8),
}

/// Driver suggestion, high nibble of `driver_status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverSuggestion {
    None,
    Retry,
    Abort,
    Remap,
    Die,
    Sense,
    Unknown(u8),
}

impl DriverStatus {
    pub fn description(&self) -> &'static str {
        match self {
            DriverStatus::Ok => "Driver OK",
            DriverStatus::Busy => "Driver Busy",
            DriverStatus::Soft => "Driver Soft",
            DriverStatus::Media => "Driver Media",
            DriverStatus::Error => "Driver Error",
            DriverStatus::Invalid => "Driver Invalid",
            DriverStatus::Timeout => "Driver Timeout",
            DriverStatus::Hard => "Driver Hard",
            DriverStatus::Sense => "Driver Sense",
            DriverStatus::Unknown(_) => "Unknown Driver Error",
        }
    }
}

impl DriverSuggestion {
    pub fn description(&self) -> &'static str {
        match self {
            DriverSuggestion::None => "No suggestion",
            DriverSuggestion::Retry => "Suggest Retry",
            DriverSuggestion::Abort => "Suggest Abort",
            DriverSuggestion::Remap => "Suggest Remap",
            DriverSuggestion::Die => "Suggest Die",
            DriverSuggestion::Sense => "Suggest Sense",
            DriverSuggestion::Unknown(_) => "Unknown Driver Suggestion",
        }
    }
}

/// Split a raw `driver_status` into its status and suggestion nibbles
pub fn decode_driver_status(raw: u16) -> (DriverStatus, DriverSuggestion) {
    let status = match (raw & DRIVER_STATUS_MASK) as u8 {
        0x00 => DriverStatus::Ok,
        0x01 => DriverStatus::Busy,
        0x02 => DriverStatus::Soft,
        0x03 => DriverStatus::Media,
        0x04 => DriverStatus::Error,
        0x05 => DriverStatus::Invalid,
        0x06 => DriverStatus::Timeout,
        0x07 => DriverStatus::Hard,
        0x08 => DriverStatus::Sense,
        other => DriverStatus::Unknown(other),
    };

    let suggestion = match (raw & DRIVER_SUGGEST_MASK) as u8 {
        0x00 => DriverSuggestion::None,
        0x10 => DriverSuggestion::Retry,
        0x20 => DriverSuggestion::Abort,
        0x30 => DriverSuggestion::Remap,
        0x40 => DriverSuggestion::Die,
        0x80 => DriverSuggestion::Sense,
        other => DriverSuggestion::Unknown(other),
    };

    (status, suggestion)
}

impl fmt::Display for MaskedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0x00, MaskedStatus::Good)]
    #[test_case(0x01, MaskedStatus::CheckCondition)]
    #[test_case(0x0c, MaskedStatus::ReservationConflict)]
    #[test_case(0x14, MaskedStatus::QueueFull)]
    #[test_case(0x1f, MaskedStatus::Unknown(0x1f))]
    fn test_masked_status(raw: u8, expected: MaskedStatus) {
        assert_eq!(MaskedStatus::from(raw), expected);
    }

    #[test_case(0x00, HostStatus::Ok)]
    #[test_case(0x01, HostStatus::NoConnect)]
    #[test_case(0x03, HostStatus::TimeOut)]
    #[test_case(0x0b, HostStatus::SoftError)]
    #[test_case(0x42, HostStatus::Unknown(0x42))]
    fn test_host_status(raw: u16, expected: HostStatus) {
        assert_eq!(HostStatus::from(raw), expected);
    }

    #[test]
    fn test_driver_status_nibbles() {
        assert_eq!(
            decode_driver_status(0x28),
            (DriverStatus::Sense, DriverSuggestion::Abort)
        );
        assert_eq!(
            decode_driver_status(0x86),
            (DriverStatus::Timeout, DriverSuggestion::Sense)
        );
        assert_eq!(
            decode_driver_status(0x0),
            (DriverStatus::Ok, DriverSuggestion::None)
        );
        assert_eq!(
            decode_driver_status(0x5f).0,
            DriverStatus::Unknown(0x0f)
        );
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(HostStatus::BadTarget.to_string(), "Bad target, device not responding");
        assert_eq!(MaskedStatus::Busy.to_string(), "Busy");
        assert_eq!(DriverSuggestion::Retry.description(), "Suggest Retry");
    }
}
