//! The POSIX termios view a tty layer hands to the driver, and the decoded
//! UART settings it is translated into.
//!
//! Only the bits the UPort can act on are modelled.  Values follow the Linux
//! `termbits.h` layout.
use crate::constants::*;
use crate::Error;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// cflag bits
pub const CBAUD: u32 = 0o010017;
pub const CSIZE: u32 = 0o000060;
pub const CS5: u32 = 0o000000;
pub const CS6: u32 = 0o000020;
pub const CS7: u32 = 0o000040;
pub const CS8: u32 = 0o000060;
pub const CSTOPB: u32 = 0o000100;
pub const CREAD: u32 = 0o000200;
pub const PARENB: u32 = 0o000400;
pub const PARODD: u32 = 0o001000;
pub const HUPCL: u32 = 0o002000;
pub const CLOCAL: u32 = 0o004000;
pub const CMSPAR: u32 = 0o10000000000;
pub const CRTSCTS: u32 = 0o20000000000;

/// iflag bits
pub const IXON: u32 = 0o002000;
pub const IXANY: u32 = 0o004000;
pub const IXOFF: u32 = 0o010000;

/// Baud rate codes carried in cflag & CBAUD
const BAUD_TABLE: &[(u32, u32)] = &[
    (0o000000, 0),
    (0o000001, 50),
    (0o000002, 75),
    (0o000003, 110),
    (0o000004, 134),
    (0o000005, 150),
    (0o000006, 200),
    (0o000007, 300),
    (0o000010, 600),
    (0o000011, 1200),
    (0o000012, 1800),
    (0o000013, 2400),
    (0o000014, 4800),
    (0o000015, 9600),
    (0o000016, 19200),
    (0o000017, 38400),
    (0o010001, 57600),
    (0o010002, 115200),
    (0o010003, 230400),
    (0o010004, 460800),
    (0o010005, 500000),
    (0o010006, 576000),
    (0o010007, 921600),
];

/// Default XON/XOFF characters (DC1/DC3)
pub const DEFAULT_XON: u8 = 0x11;
pub const DEFAULT_XOFF: u8 = 0x13;

/// The cflag code for a standard baud rate, if there is one
pub fn baud_to_code(baud: u32) -> Option<u32> {
    BAUD_TABLE
        .iter()
        .find(|(_, rate)| *rate == baud)
        .map(|(code, _)| *code)
}

/// The baud rate for a cflag code, if the code is known
pub fn code_to_baud(code: u32) -> Option<u32> {
    BAUD_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, rate)| *rate)
}

/// The subset of a tty's termios the driver consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termios {
    pub cflag: u32,
    pub iflag: u32,
    pub xon: u8,
    pub xoff: u8,
}

impl Default for Termios {
    /// 9600 8N1, receiver enabled, no flow control
    fn default() -> Self {
        Self {
            cflag: 0o000015 | CS8 | CREAD | HUPCL | CLOCAL,
            iflag: 0,
            xon: DEFAULT_XON,
            xoff: DEFAULT_XOFF,
        }
    }
}

impl Termios {
    /// Build a termios from decoded settings.  The baud rate must be one of
    /// the standard rates.
    pub fn from_settings(settings: &LineSettings) -> Result<Self, Error> {
        trace!("Termios::from_settings {settings}");
        let code = baud_to_code(settings.baud).ok_or_else(|| Error::Args {
            message: format!(
                "Baud rate {} has no termios code, use a special baud rate instead",
                settings.baud
            ),
        })?;

        let mut cflag = code | CREAD | HUPCL | CLOCAL;
        cflag |= match settings.data_bits {
            DataBits::Five => CS5,
            DataBits::Six => CS6,
            DataBits::Seven => CS7,
            DataBits::Eight => CS8,
        };
        cflag |= match settings.parity {
            Parity::None => 0,
            Parity::Odd => PARENB | PARODD,
            Parity::Even => PARENB,
            Parity::Mark => PARENB | CMSPAR | PARODD,
            Parity::Space => PARENB | CMSPAR,
        };
        if settings.stop_bits == StopBits::Two {
            cflag |= CSTOPB;
        }
        if settings.flow.contains(FlowControl::RTS_CTS) {
            cflag |= CRTSCTS;
        }

        let mut iflag = 0;
        if settings.flow.contains(FlowControl::XON_XOFF_OUT) {
            iflag |= IXON;
        }
        if settings.flow.contains(FlowControl::XON_XOFF_IN) {
            iflag |= IXOFF;
        }

        Ok(Self {
            cflag,
            iflag,
            xon: settings.xon,
            xoff: settings.xoff,
        })
    }

    /// The baud rate encoded in cflag, or `None` for an unknown code
    pub fn baud(&self) -> Option<u32> {
        code_to_baud(self.cflag & CBAUD)
    }

    /// Decode into UART settings
    pub fn settings(&self) -> Result<LineSettings, Error> {
        let baud = self.baud().ok_or_else(|| Error::Args {
            message: format!("Unknown baud code 0o{:o}", self.cflag & CBAUD),
        })?;

        let data_bits = match self.cflag & CSIZE {
            CS5 => DataBits::Five,
            CS6 => DataBits::Six,
            CS7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let parity = if self.cflag & PARENB == 0 {
            Parity::None
        } else if self.cflag & CMSPAR != 0 {
            if self.cflag & PARODD != 0 {
                Parity::Mark
            } else {
                Parity::Space
            }
        } else if self.cflag & PARODD != 0 {
            Parity::Odd
        } else {
            Parity::Even
        };

        let stop_bits = if self.cflag & CSTOPB != 0 {
            StopBits::Two
        } else {
            StopBits::One
        };

        let mut flow = FlowControl::NONE;
        if self.cflag & CRTSCTS != 0 {
            flow |= FlowControl::RTS_CTS;
        }
        if self.iflag & IXON != 0 {
            flow |= FlowControl::XON_XOFF_OUT;
        }
        if self.iflag & IXOFF != 0 {
            flow |= FlowControl::XON_XOFF_IN;
        }

        Ok(LineSettings {
            baud,
            data_bits,
            parity,
            stop_bits,
            flow,
            xon: self.xon,
            xoff: self.xoff,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Value used in the SET_LINE request
    pub fn wire_value(self) -> u8 {
        match self {
            Parity::None => MX_PARITY_NONE,
            Parity::Odd => MX_PARITY_ODD,
            Parity::Even => MX_PARITY_EVEN,
            Parity::Mark => MX_PARITY_MARK,
            Parity::Space => MX_PARITY_SPACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl StopBits {
    /// Value used in the SET_LINE request
    pub fn wire_value(self) -> u8 {
        match self {
            StopBits::One => MX_STOP_BITS_1,
            StopBits::Two => MX_STOP_BITS_2,
        }
    }
}

/// Flow control bitmask.  RTS_CTS and the XON/XOFF bits come from termios;
/// DSR and DCD handshaking can only be enabled explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowControl(u8);

impl FlowControl {
    pub const NONE: FlowControl = FlowControl(0);
    /// Hardware RTS/CTS
    pub const RTS_CTS: FlowControl = FlowControl(0x01);
    /// Software flow control on received data - we send XON/XOFF
    pub const XON_XOFF_IN: FlowControl = FlowControl(0x02);
    /// Software flow control on transmitted data - we obey XON/XOFF
    pub const XON_XOFF_OUT: FlowControl = FlowControl(0x04);
    /// Hold transmission while DSR is low
    pub const DSR: FlowControl = FlowControl(0x08);
    /// Hold transmission while DCD is low
    pub const DCD: FlowControl = FlowControl(0x10);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: FlowControl) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: FlowControl) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_software(self) -> bool {
        self.intersects(FlowControl::XON_XOFF_IN | FlowControl::XON_XOFF_OUT)
    }
}

impl std::ops::BitOr for FlowControl {
    type Output = FlowControl;

    fn bitor(self, rhs: FlowControl) -> FlowControl {
        FlowControl(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FlowControl {
    fn bitor_assign(&mut self, rhs: FlowControl) {
        self.0 |= rhs.0;
    }
}

impl std::ops::Sub for FlowControl {
    type Output = FlowControl;

    fn sub(self, rhs: FlowControl) -> FlowControl {
        FlowControl(self.0 & !rhs.0)
    }
}

/// Decoded UART configuration of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow: FlowControl,
    pub xon: u8,
    pub xoff: u8,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow: FlowControl::NONE,
            xon: DEFAULT_XON,
            xoff: DEFAULT_XOFF,
        }
    }
}

impl LineSettings {
    /// Payload of the SET_LINE request
    pub fn line_payload(&self) -> [u8; 4] {
        [
            self.data_bits.bits(),
            self.parity.wire_value(),
            self.stop_bits.wire_value(),
            0,
        ]
    }
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(
            f,
            "{} {}{}{} flow 0x{:02x}",
            self.baud,
            self.data_bits.bits(),
            parity,
            stop,
            self.flow.bits()
        )
    }
}

/// Electrical interface of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterfaceMode {
    #[default]
    Rs232,
    Rs485TwoWire,
    Rs422,
    Rs485FourWire,
}

impl InterfaceMode {
    /// Value used in the SET_INTERFACE request
    pub fn wire_value(self) -> u16 {
        match self {
            InterfaceMode::Rs232 => MX_INT_RS232,
            InterfaceMode::Rs485TwoWire => MX_INT_2W_RS485,
            InterfaceMode::Rs422 => MX_INT_RS422,
            InterfaceMode::Rs485FourWire => MX_INT_4W_RS485,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            MX_INT_RS232 => Some(InterfaceMode::Rs232),
            MX_INT_2W_RS485 => Some(InterfaceMode::Rs485TwoWire),
            MX_INT_RS422 => Some(InterfaceMode::Rs422),
            MX_INT_4W_RS485 => Some(InterfaceMode::Rs485FourWire),
            _ => None,
        }
    }
}

impl fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceMode::Rs232 => write!(f, "RS-232"),
            InterfaceMode::Rs485TwoWire => write!(f, "RS-485 2-wire"),
            InterfaceMode::Rs422 => write!(f, "RS-422"),
            InterfaceMode::Rs485FourWire => write!(f, "RS-485 4-wire"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_termios_is_9600_8n1() {
        let settings = Termios::default().settings().unwrap();
        assert_eq!(settings, LineSettings::default());
        assert_eq!(settings.line_payload(), [8, MX_PARITY_NONE, MX_STOP_BITS_1, 0]);
    }

    #[test]
    fn test_settings_through_termios() {
        let settings = LineSettings {
            baud: 115200,
            data_bits: DataBits::Seven,
            parity: Parity::Mark,
            stop_bits: StopBits::Two,
            flow: FlowControl::RTS_CTS | FlowControl::XON_XOFF_IN,
            xon: 0x11,
            xoff: 0x13,
        };
        let termios = Termios::from_settings(&settings).unwrap();
        assert_eq!(termios.cflag & CRTSCTS, CRTSCTS);
        assert_eq!(termios.iflag, IXOFF);
        assert_eq!(termios.settings().unwrap(), settings);
    }

    #[test]
    fn test_nonstandard_baud_rejected() {
        let settings = LineSettings {
            baud: 12345,
            ..Default::default()
        };
        assert!(matches!(
            Termios::from_settings(&settings),
            Err(Error::Args { .. })
        ));
    }

    #[test]
    fn test_flow_control_ops() {
        let flow = FlowControl::RTS_CTS | FlowControl::DSR;
        assert!(flow.contains(FlowControl::RTS_CTS));
        assert!(!flow.is_software());
        assert_eq!(flow - FlowControl::DSR, FlowControl::RTS_CTS);
    }
}
