use crate::error::ConnectionError;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum SettingsParameter {
    /// Maximum size of the header compression table used to decode header blocks, in octets. Initial value 4096.
    HeaderTableSize = 0x1,
    /// 0 or 1; disables/enables server push. Initial value 1.
    EnablePush = 0x2,
    /// Maximum number of concurrent streams the sender will allow the receiver to create.
    MaxConcurrentStreams = 0x3,
    /// Initial window size (octets) for stream-level flow control. Initial value 2^16-1.
    InitialWindowSize = 0x4,
    /// Largest frame payload the sender is willing to receive, in octets. Must be within [16384, 16777215].
    MaxFrameSize = 0x5,
    /// Advisory maximum size of header list the sender is prepared to accept.
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    #[must_use]
    pub fn from_wire(id: u16) -> Option<Self> {
        // unknown identifiers are ignored per RFC 7540 6.5.2
        Self::from_u16(id)
    }
}

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;
pub const DEFAULT_ENABLE_PUSH: u32 = 1;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = u32::MAX;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_FRAME_SIZE_CEILING: u32 = 16_777_215;
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = u32::MAX;

/// One direction's negotiated SETTINGS. Remote settings take effect
/// immediately on receipt; local settings take effect only once the peer
/// ACKs the SETTINGS frame that carried them (see `Connection`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: DEFAULT_ENABLE_PUSH != 0,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: DEFAULT_MAX_HEADER_LIST_SIZE,
        }
    }
}

impl Settings {
    /// Applies one SETTINGS entry, validating per RFC 7540 6.5.2. Unknown
    /// parameters are already filtered out by `SettingsParameter::from_wire`
    /// before this is called.
    pub fn apply(&mut self, param: SettingsParameter, value: u32) -> Result<(), ConnectionError> {
        match param {
            SettingsParameter::HeaderTableSize => self.header_table_size = value,
            SettingsParameter::EnablePush => {
                if value > 1 {
                    return Err(ConnectionError::protocol("SETTINGS_ENABLE_PUSH must be 0 or 1"));
                }
                self.enable_push = value != 0;
            }
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams = value,
            SettingsParameter::InitialWindowSize => {
                if value > crate::flow_control::MAX_WINDOW_SIZE {
                    return Err(ConnectionError::flow_control(
                        "SETTINGS_INITIAL_WINDOW_SIZE exceeds 2^31-1",
                    ));
                }
                self.initial_window_size = value;
            }
            SettingsParameter::MaxFrameSize => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_CEILING).contains(&value) {
                    return Err(ConnectionError::protocol(
                        "SETTINGS_MAX_FRAME_SIZE out of [16384, 16777215]",
                    ));
                }
                self.max_frame_size = value;
            }
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size = value,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_push_out_of_range_is_protocol_error() {
        let mut settings = Settings::default();
        assert!(settings.apply(SettingsParameter::EnablePush, 2).is_err());
    }

    #[test]
    fn max_frame_size_out_of_range_is_protocol_error() {
        let mut settings = Settings::default();
        assert!(settings.apply(SettingsParameter::MaxFrameSize, 100).is_err());
        assert!(settings
            .apply(SettingsParameter::MaxFrameSize, MAX_FRAME_SIZE_CEILING + 1)
            .is_err());
    }

    #[test]
    fn initial_window_size_overflow_is_flow_control_error() {
        let mut settings = Settings::default();
        assert!(settings
            .apply(SettingsParameter::InitialWindowSize, u32::MAX)
            .is_err());
    }

    #[test]
    fn unknown_identifiers_are_ignored() {
        assert_eq!(SettingsParameter::from_wire(0x42), None);
    }
}
