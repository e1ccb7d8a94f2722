//! Constants used in the MOXA UPort implementation
use std::time::Duration;

/// UPort device info

/// MOXA USB vendor ID
pub const MOXA_VID: u16 = 0x110a;
/// UPort 1250 (2 port, RS-232/422/485)
pub const UPORT1250_PID: u16 = 0x1250;
/// UPort 1251 (2 port, isolated RS-232/422/485)
pub const UPORT1251_PID: u16 = 0x1251;
/// UPort 1410 (4 port, RS-232)
pub const UPORT1410_PID: u16 = 0x1410;
/// UPort 1450 (4 port, RS-232/422/485)
pub const UPORT1450_PID: u16 = 0x1450;
/// UPort 1451 (4 port, isolated RS-232/422/485)
pub const UPORT1451_PID: u16 = 0x1451;
/// UPort 1618 (8 port, RS-232)
pub const UPORT1618_PID: u16 = 0x1618;
/// UPort 1658 (8 port, RS-232/422/485)
pub const UPORT1658_PID: u16 = 0x1658;
/// UPort 1613 (16 port, RS-232)
pub const UPORT1613_PID: u16 = 0x1613;
/// UPort 1653 (16 port, RS-232/422/485)
pub const UPORT1653_PID: u16 = 0x1653;

/// Vendor control requests.  wIndex carries the port number where the
/// request is port specific.

/// Set baud rate, 4 byte little endian payload
pub const RQ_VENDOR_SET_BAUD: u8 = 0x01;
/// Set line: data bits, parity, stop bits, reserved
pub const RQ_VENDOR_SET_LINE: u8 = 0x02;
/// Set XON/XOFF characters, 2 byte payload
pub const RQ_VENDOR_SET_CHARS: u8 = 0x03;
/// Set RTS, value is one of MX_RTS_*
pub const RQ_VENDOR_SET_RTS: u8 = 0x04;
/// Set DTR, value 0 or 1
pub const RQ_VENDOR_SET_DTR: u8 = 0x05;
/// Enable/disable automatic XON/XOFF handling on the device
pub const RQ_VENDOR_SET_XONXOFF: u8 = 0x06;
/// Enable/disable the device sending received data to the host
pub const RQ_VENDOR_SET_RX_HOST_EN: u8 = 0x07;
/// Open/close the port on the device
pub const RQ_VENDOR_SET_OPEN: u8 = 0x08;
/// Purge the device side rx and/or tx buffers, value is PURGE_*
pub const RQ_VENDOR_PURGE: u8 = 0x09;
/// Set break signal, value 0 or 1
pub const RQ_VENDOR_SET_BREAK: u8 = 0x0b;
/// Start a firmware download
pub const RQ_VENDOR_START_FW_DOWN: u8 = 0x0c;
/// Finish a firmware download
pub const RQ_VENDOR_STOP_FW_DOWN: u8 = 0x0d;
/// Ask the device to switch to newly downloaded firmware
pub const RQ_VENDOR_QUERY_FW_READY: u8 = 0x0e;
/// Disable the UART FIFO
pub const RQ_VENDOR_SET_FIFO_DISABLE: u8 = 0x0f;
/// Set interface mode, value is one of MX_INT_*
pub const RQ_VENDOR_SET_INTERFACE: u8 = 0x10;
/// Set high performance mode
pub const RQ_VENDOR_SET_HIGH_PERFOR: u8 = 0x11;
/// One block of firmware data
pub const RQ_VENDOR_FW_DATA: u8 = 0x20;
/// Reset the device
pub const RQ_VENDOR_RESET_DEVICE: u8 = 0x23;
/// Query the firmware configuration - used to check the device is alive
pub const RQ_VENDOR_QUERY_FW_CONFIG: u8 = 0x24;
/// Read the firmware version, 3 significant bytes
pub const RQ_VENDOR_GET_VERSION: u8 = 0x81;
/// Read the number of bytes still held in the device's tx buffer
pub const RQ_VENDOR_GET_OUTQUEUE: u8 = 0x85;

/// Names used when logging control requests
pub fn request_name(request: u8) -> &'static str {
    match request {
        RQ_VENDOR_SET_BAUD => "SET_BAUD",
        RQ_VENDOR_SET_LINE => "SET_LINE",
        RQ_VENDOR_SET_CHARS => "SET_CHARS",
        RQ_VENDOR_SET_RTS => "SET_RTS",
        RQ_VENDOR_SET_DTR => "SET_DTR",
        RQ_VENDOR_SET_XONXOFF => "SET_XONXOFF",
        RQ_VENDOR_SET_RX_HOST_EN => "SET_RX_HOST_EN",
        RQ_VENDOR_SET_OPEN => "SET_OPEN",
        RQ_VENDOR_PURGE => "PURGE",
        RQ_VENDOR_SET_BREAK => "SET_BREAK",
        RQ_VENDOR_START_FW_DOWN => "START_FW_DOWN",
        RQ_VENDOR_STOP_FW_DOWN => "STOP_FW_DOWN",
        RQ_VENDOR_QUERY_FW_READY => "QUERY_FW_READY",
        RQ_VENDOR_SET_FIFO_DISABLE => "SET_FIFO_DISABLE",
        RQ_VENDOR_SET_INTERFACE => "SET_INTERFACE",
        RQ_VENDOR_SET_HIGH_PERFOR => "SET_HIGH_PERFOR",
        RQ_VENDOR_FW_DATA => "FW_DATA",
        RQ_VENDOR_RESET_DEVICE => "RESET_DEVICE",
        RQ_VENDOR_QUERY_FW_CONFIG => "QUERY_FW_CONFIG",
        RQ_VENDOR_GET_VERSION => "GET_VERSION",
        RQ_VENDOR_GET_OUTQUEUE => "GET_OUTQUEUE",
        _ => "UNKNOWN",
    }
}

/// RTS control values
pub const MX_RTS_DISABLE: u16 = 0x0;
pub const MX_RTS_ENABLE: u16 = 0x1;
/// RTS driven by the device for hardware flow control
pub const MX_RTS_HW: u16 = 0x2;

/// Parity values used in SET_LINE
pub const MX_PARITY_NONE: u8 = 0;
pub const MX_PARITY_ODD: u8 = 1;
pub const MX_PARITY_EVEN: u8 = 2;
pub const MX_PARITY_MARK: u8 = 3;
pub const MX_PARITY_SPACE: u8 = 4;

/// Stop bit values used in SET_LINE
pub const MX_STOP_BITS_1: u8 = 0;
pub const MX_STOP_BITS_2: u8 = 2;

/// Interface modes used in SET_INTERFACE
pub const MX_INT_RS232: u16 = 0;
pub const MX_INT_2W_RS485: u16 = 1;
pub const MX_INT_RS422: u16 = 2;
pub const MX_INT_4W_RS485: u16 = 3;

/// PURGE values
pub const PURGE_OUT: u16 = 0x4;
pub const PURGE_IN: u16 = 0x8;
pub const PURGE_BOTH: u16 = PURGE_OUT | PURGE_IN;

/// Event codes arriving on the event pipe
pub const UPORT_EVENT_NONE: u16 = 0;
pub const UPORT_EVENT_TXBUF_THRESHOLD: u16 = 1;
pub const UPORT_EVENT_SEND_NEXT: u16 = 2;
pub const UPORT_EVENT_MSR: u16 = 3;
pub const UPORT_EVENT_LSR: u16 = 4;
pub const UPORT_EVENT_MCR: u16 = 5;

/// MSR event change bits (which lines changed)
pub const SERIAL_EV_CTS: u16 = 0x0008;
pub const SERIAL_EV_DSR: u16 = 0x0010;
pub const SERIAL_EV_RLSD: u16 = 0x0020;

/// MCR event bit - device is holding transmission because of a received XOFF
pub const SERIAL_EV_XOFF: u16 = 0x0040;

/// Modem status register bits, as carried in the MSR event level byte
pub const UART_MSR_CTS: u8 = 0x10;
pub const UART_MSR_DSR: u8 = 0x20;
pub const UART_MSR_RI: u8 = 0x40;
pub const UART_MSR_DCD: u8 = 0x80;

/// Line status register bits, as carried in the LSR event
pub const UART_LSR_OE: u8 = 0x02;
pub const UART_LSR_PE: u8 = 0x04;
pub const UART_LSR_FE: u8 = 0x08;
pub const UART_LSR_BI: u8 = 0x10;

/// Hold reasons.  Each is an independent bit.  Transmission is gated while
/// any bit is set; receive push-up only by [`HOLD_RX_MASK`].
pub const MX_WAIT_FOR_CTS: u16 = 0x0001;
pub const MX_WAIT_FOR_DSR: u16 = 0x0002;
pub const MX_WAIT_FOR_DCD: u16 = 0x0004;
pub const MX_WAIT_FOR_XON: u16 = 0x0008;
pub const MX_WAIT_FOR_START_TX: u16 = 0x0010;
pub const MX_WAIT_FOR_UNTHROTTLE: u16 = 0x0020;
pub const MX_WAIT_FOR_LOW_WATER: u16 = 0x0040;
pub const MX_WAIT_FOR_SEND_NEXT: u16 = 0x0080;
/// Hold reasons which stop received data being pushed to the listener
pub const HOLD_RX_MASK: u16 = MX_WAIT_FOR_UNTHROTTLE | MX_WAIT_FOR_LOW_WATER;

/// Framing

/// Size of the header prefixing each chunk on the data pipes
pub const HEADER_SIZE: usize = 4;
/// Sequence flag in byte 0 of an outgoing header
pub const HEADER_SEQ_FLAG: u8 = 0x80;
/// Size of each record on the event pipe
pub const MAX_EVENT_LENGTH: usize = 8;
/// Largest port count of any UPort; ports are assumed to be below 128
pub const MAX_PORTS: usize = 16;

/// Queue and flow control defaults

/// Capacity of each per-port circular queue
pub const MAX_QUEUE_SIZE: usize = 32 * 1024;
/// Receive depth at which the device is told to stop sending
pub const HIGH_WATER_SIZE: usize = MAX_QUEUE_SIZE * 3 / 4;
/// Receive depth at which the device is told to resume sending
pub const LOW_WATER_SIZE: usize = MAX_QUEUE_SIZE / 4;
/// Transmitted bytes after which a chunk requests a SEND_NEXT acknowledgement
pub const TRIGGER_SEND_NEXT: usize = 4096;
/// Default bulk out max packet size if the endpoint cannot be read
pub const DEFAULT_BULKOUT_SIZE: usize = 512;

/// Firmware

/// Firmware is streamed in blocks of this size
pub const DOWN_BLOCK_SIZE: usize = 64;
/// Offsets of the three version bytes within a firmware image
pub const FW_VER_ADDR_1: usize = 0x20;
pub const FW_VER_ADDR_2: usize = 0x24;
pub const FW_VER_ADDR_3: usize = 0x28;
/// Size of the GET_VERSION response
pub const VERSION_BUF_SIZE: usize = 4;
/// Size of the GET_OUTQUEUE response
pub const OUTQUEUE_BUF_SIZE: usize = 4;

/// Timeouts

/// Used to wait for the USB device to respond to a control message
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
/// Used to wait on a bulk read before checking whether the pipe was killed
pub const DEFAULT_READ_POLL_TIMEOUT: Duration = Duration::from_millis(250);
/// Used to wait for a bulk write to complete
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Delay between firmware blocks
pub const DEFAULT_FW_BLOCK_DELAY: Duration = Duration::from_millis(10);
/// Delay after STOP_FW_DOWN and after QUERY_FW_READY
pub const DEFAULT_FW_SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Interval between GET_OUTQUEUE polls while draining
pub const DEFAULT_DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Maximum GET_OUTQUEUE polls while draining
pub const DEFAULT_DRAIN_MAX_POLLS: u32 = 30;

/// Host ioctl codes understood by [`crate::DeviceSession::ioctl`]
pub const TCXONC: u32 = 0x540a;
pub const TCFLSH: u32 = 0x540b;
pub const TIOCMGET: u32 = 0x5415;
pub const TIOCMBIS: u32 = 0x5416;
pub const TIOCMBIC: u32 = 0x5417;
pub const TIOCMSET: u32 = 0x5418;
pub const TIOCSERGETLSR: u32 = 0x5459;
pub const TIOCMIWAIT: u32 = 0x545c;
pub const TIOCGICOUNT: u32 = 0x545d;
/// MOXA vendor ioctl base
pub const MOXA: u32 = 0x400;
pub const MOXA_SET_OP_MODE: u32 = MOXA + 66;
pub const MOXA_GET_OP_MODE: u32 = MOXA + 67;
pub const MOXA_SET_SPECIAL_BAUD_RATE: u32 = MOXA + 100;
pub const MOXA_GET_SPECIAL_BAUD_RATE: u32 = MOXA + 101;

/// TCXONC arguments
pub const TCOOFF: u32 = 0;
pub const TCOON: u32 = 1;
pub const TCIOFF: u32 = 2;
pub const TCION: u32 = 3;

/// TCFLSH arguments
pub const TCIFLUSH: u32 = 0;
pub const TCOFLUSH: u32 = 1;
pub const TCIOFLUSH: u32 = 2;

/// Modem line bits used by TIOCMGET/TIOCMSET/TIOCMIWAIT
pub const TIOCM_DTR: u32 = 0x002;
pub const TIOCM_RTS: u32 = 0x004;
pub const TIOCM_CTS: u32 = 0x020;
pub const TIOCM_CAR: u32 = 0x040;
pub const TIOCM_RNG: u32 = 0x080;
pub const TIOCM_DSR: u32 = 0x100;

/// TIOCSERGETLSR result when the transmitter is empty
pub const TIOCSER_TEMT: u32 = 0x01;

/// Kernel internal errno for unrecognized ioctls
pub const ENOIOCTLCMD: i32 = 515;
