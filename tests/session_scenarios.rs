//! End to end session behaviour against a simulated UPort.
//!
//! Each test attaches a [`DeviceSession`] to a [`MockTransport`], feeds it
//! completions as the USB stack would, and checks what reached the device
//! and the host.

use mxuport::codec::{encode_frames, Event, EventRecord};
use mxuport::constants::*;
use mxuport::{
    Completion, DeviceSession, DrainStatus, Endpoints, Error, FlowControl, InterfaceMode,
    IoctlResult, LineSettings, MockTransport, Pipe, PortError, PortListener, SessionConfig,
    Termios,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Session = DeviceSession<Arc<MockTransport>>;

/// Collects everything the session hands to the host
#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<(usize, Vec<u8>)>>,
    wakeups: Mutex<Vec<usize>>,
    modem: Mutex<Vec<(usize, u8)>>,
}

impl PortListener for Recorder {
    fn receive(&self, port: usize, data: &[u8]) {
        self.received.lock().push((port, data.to_vec()));
    }

    fn write_wakeup(&self, port: usize) {
        self.wakeups.lock().push(port);
    }

    fn modem_change(&self, port: usize, msr: u8) {
        self.modem.lock().push((port, msr));
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        drain_poll_interval: Duration::from_millis(1),
        drain_max_polls: 3,
        ..Default::default()
    }
}

fn attach_with(product_id: u16, config: SessionConfig) -> (Session, Arc<MockTransport>) {
    let mock = Arc::new(MockTransport::new(Endpoints::default()));
    let session = DeviceSession::attach(mock.clone(), product_id, config).unwrap();
    (session, mock)
}

fn attach_1410() -> (Session, Arc<MockTransport>) {
    attach_with(UPORT1410_PID, fast_config())
}

fn feed_data(session: &Session, frames: &[(u16, &[u8])]) {
    session.handle_completion(Completion::Read {
        pipe: Pipe::Data,
        data: encode_frames(frames),
    });
}

fn feed_events(session: &Session, records: &[EventRecord]) {
    let data = records.iter().flat_map(|r| r.encode()).collect();
    session.handle_completion(Completion::Read {
        pipe: Pipe::Event,
        data,
    });
}

fn write_done(session: &Session, port: usize) {
    session.handle_completion(Completion::Write {
        port,
        result: Ok(0),
    });
}

/// Asynchronous RX_HOST_EN requests for `port`, as their values
fn async_rx_enables(mock: &MockTransport, port: u16) -> Vec<u16> {
    mock.requests_of(RQ_VENDOR_SET_RX_HOST_EN)
        .into_iter()
        .filter(|r| r.asynchronous && r.index == port)
        .map(|r| r.value)
        .collect()
}

#[test]
fn test_frames_are_demultiplexed_per_port() {
    let (session, _mock) = attach_1410();
    session.open(1).unwrap();
    session.open(3).unwrap();

    feed_data(&session, &[(1, b"AB"), (3, b"CDE")]);

    assert_eq!(session.rx_depth(0).unwrap(), 0);
    assert_eq!(session.rx_depth(1).unwrap(), 2);
    assert_eq!(session.rx_depth(2).unwrap(), 0);
    assert_eq!(session.rx_depth(3).unwrap(), 3);

    let mut buf = [0u8; 8];
    assert_eq!(session.read(3, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"CDE");
    assert_eq!(session.icount(1).unwrap().rx, 2);
}

#[test]
fn test_listener_receives_pushed_data() {
    let (session, _mock) = attach_1410();
    let recorder = Arc::new(Recorder::default());
    session.set_listener(recorder.clone());
    session.open(2).unwrap();

    feed_data(&session, &[(2, b"hello"), (2, b" world")]);

    let received = recorder.received.lock().clone();
    let bytes: Vec<u8> = received.iter().flat_map(|(_, d)| d.clone()).collect();
    assert!(received.iter().all(|(port, _)| *port == 2));
    assert_eq!(bytes, b"hello world");
    assert_eq!(session.rx_depth(2).unwrap(), 0);
}

#[test]
fn test_frames_for_closed_port_are_dropped() {
    let (session, _mock) = attach_1410();
    session.open(0).unwrap();

    feed_data(&session, &[(1, b"lost"), (0, b"kept")]);

    assert_eq!(session.rx_depth(0).unwrap(), 4);
    assert_eq!(session.rx_depth(1).unwrap(), 0);
}

#[test]
fn test_invalid_port_abandons_rest_of_transfer() {
    let (session, mock) = attach_1410();
    session.open(1).unwrap();
    let submits = mock.read_submits(Pipe::Data);

    mock.complete_read(Pipe::Data);
    feed_data(&session, &[(1, b"AB"), (9, b"??"), (1, b"CD")]);

    assert_eq!(session.rx_depth(1).unwrap(), 2);
    // The pipe is still put back in flight
    assert!(mock.read_in_flight(Pipe::Data));
    assert_eq!(mock.read_submits(Pipe::Data), submits + 1);
}

#[test]
fn test_identical_termios_is_not_resent() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();
    assert_eq!(mock.count(RQ_VENDOR_SET_LINE), 1);
    assert_eq!(mock.count(RQ_VENDOR_SET_BAUD), 1);

    session.set_termios(0, Termios::default()).unwrap();
    session.set_termios(0, Termios::default()).unwrap();
    assert_eq!(mock.count(RQ_VENDOR_SET_LINE), 1);
    assert_eq!(mock.count(RQ_VENDOR_SET_BAUD), 1);

    let settings = LineSettings {
        baud: 115200,
        ..Default::default()
    };
    session
        .set_termios(0, Termios::from_settings(&settings).unwrap())
        .unwrap();
    assert_eq!(mock.count(RQ_VENDOR_SET_LINE), 2);
    let baud = mock.requests_of(RQ_VENDOR_SET_BAUD);
    assert_eq!(baud.last().unwrap().data, 115200u32.to_le_bytes().to_vec());
    assert_eq!(session.baud(0).unwrap(), 115200);
}

#[test]
fn test_software_flow_programs_chars() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();
    mock.clear_requests();

    let settings = LineSettings {
        flow: FlowControl::XON_XOFF_IN | FlowControl::XON_XOFF_OUT,
        ..Default::default()
    };
    session
        .set_termios(0, Termios::from_settings(&settings).unwrap())
        .unwrap();

    let chars = mock.requests_of(RQ_VENDOR_SET_CHARS);
    assert_eq!(chars.len(), 1);
    let xonxoff = mock.requests_of(RQ_VENDOR_SET_XONXOFF);
    assert_eq!(xonxoff.len(), 1);
    assert_eq!(xonxoff[0].value, 1);
}

#[test]
fn test_receive_backpressure_is_exactly_once() {
    let config = SessionConfig {
        queue_capacity: 64,
        high_water: 48,
        low_water: 16,
        ..fast_config()
    };
    let (session, mock) = attach_with(UPORT1410_PID, config);
    session.open(2).unwrap();

    feed_data(&session, &[(2, &[0x55; 48])]);
    assert!(session.holds(2).unwrap().contains(MX_WAIT_FOR_LOW_WATER));
    assert_eq!(async_rx_enables(&mock, 2), vec![0]);

    // Further data while held doesn't disable again
    feed_data(&session, &[(2, &[0x55; 10])]);
    assert_eq!(session.rx_depth(2).unwrap(), 58);
    assert_eq!(async_rx_enables(&mock, 2), vec![0]);

    let mut buf = [0u8; 64];
    assert_eq!(session.read(2, &mut buf[..41]).unwrap(), 41);
    assert_eq!(session.rx_depth(2).unwrap(), 17);
    assert_eq!(async_rx_enables(&mock, 2), vec![0]);

    assert_eq!(session.read(2, &mut buf[..1]).unwrap(), 1);
    assert_eq!(session.rx_depth(2).unwrap(), 16);
    assert_eq!(async_rx_enables(&mock, 2), vec![0, 1]);
    assert!(session.holds(2).unwrap().is_empty());

    session.read(2, &mut buf).unwrap();
    assert_eq!(async_rx_enables(&mock, 2), vec![0, 1]);
}

#[test]
fn test_throttle_and_low_water_share_one_disable() {
    let config = SessionConfig {
        queue_capacity: 64,
        high_water: 48,
        low_water: 16,
        ..fast_config()
    };
    let (session, mock) = attach_with(UPORT1410_PID, config);
    session.open(0).unwrap();

    session.throttle(0).unwrap();
    feed_data(&session, &[(0, &[1; 50])]);
    assert_eq!(async_rx_enables(&mock, 0), vec![0]);

    // Draining past low water leaves the throttle in place
    let mut buf = [0u8; 64];
    session.read(0, &mut buf).unwrap();
    assert_eq!(async_rx_enables(&mock, 0), vec![0]);

    session.unthrottle(0).unwrap();
    assert_eq!(async_rx_enables(&mock, 0), vec![0, 1]);
    assert!(session.holds(0).unwrap().is_empty());
}

#[test]
fn test_send_next_sequencing() {
    let config = SessionConfig {
        trigger_send_next: 8,
        ..fast_config()
    };
    let (session, mock) = attach_with(UPORT1410_PID, config);
    session.open(0).unwrap();

    assert_eq!(session.write(0, &[0xaa; 10]).unwrap(), 10);
    let sent = mock.take_bulk_out();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1[0] & HEADER_SEQ_FLAG, 0);
    assert_eq!(sent[0].1.len(), HEADER_SIZE + 10);

    // Queued behind the write in flight
    session.write(0, &[0xbb; 5]).unwrap();
    assert!(mock.take_bulk_out().is_empty());

    // The trigger has been crossed so the next chunk asks for SEND_NEXT
    write_done(&session, 0);
    let sent = mock.take_bulk_out();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1[0] & HEADER_SEQ_FLAG, HEADER_SEQ_FLAG);
    assert_eq!(&sent[0].1[HEADER_SIZE..], &[0xbb; 5]);
    assert!(session.holds(0).unwrap().contains(MX_WAIT_FOR_SEND_NEXT));

    session.write(0, &[0xcc; 3]).unwrap();
    write_done(&session, 0);
    assert!(mock.take_bulk_out().is_empty());

    feed_events(
        &session,
        &[EventRecord {
            port: 0,
            event: Event::SendNext,
        }],
    );
    let sent = mock.take_bulk_out();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1[0] & HEADER_SEQ_FLAG, 0);
    assert_eq!(&sent[0].1[HEADER_SIZE..], &[0xcc; 3]);
    assert!(session.holds(0).unwrap().is_empty());
}

#[test]
fn test_failed_send_next_chunk_releases_hold() {
    let config = SessionConfig {
        trigger_send_next: 8,
        ..fast_config()
    };
    let (session, mock) = attach_with(UPORT1410_PID, config);
    session.open(0).unwrap();

    session.write(0, &[0xaa; 10]).unwrap();
    assert_eq!(mock.take_bulk_out().len(), 1);
    session.write(0, &[0xbb; 5]).unwrap();

    // The chunk carrying the sequence flag never reaches the device
    mock.fail_bulk_out(true);
    write_done(&session, 0);
    assert!(mock.take_bulk_out().is_empty());
    assert!(session.holds(0).unwrap().is_empty());
    assert_eq!(session.icount(0).unwrap().tx, 10);

    mock.fail_bulk_out(false);
    session.write(0, &[0xcc; 3]).unwrap();
    let sent = mock.take_bulk_out();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0].1[HEADER_SIZE..], &[0xcc; 3]);
}

#[test]
fn test_open_reports_usb_status() {
    let (session, mock) = attach_1410();
    mock.fail_request(RQ_VENDOR_SET_OPEN);

    let err = session.open(0).unwrap_err();
    assert_eq!(err.to_status(), -libc::EPIPE);
    assert!(!session.is_open(0));
    assert!(!mock.read_in_flight(Pipe::Data));

    mock.clear_failures();
    session.open(0).unwrap();
    assert!(session.is_open(0));
}

#[test]
fn test_write_wakeup_when_queue_drains() {
    let (session, mock) = attach_1410();
    let recorder = Arc::new(Recorder::default());
    session.set_listener(recorder.clone());
    session.open(1).unwrap();
    recorder.wakeups.lock().clear();

    session.write(1, b"ping").unwrap();
    assert_eq!(mock.take_bulk_out().len(), 1);
    assert_eq!(session.chars_in_buffer(1).unwrap(), 0);

    write_done(&session, 1);
    assert_eq!(*recorder.wakeups.lock(), vec![1]);
    assert_eq!(session.icount(1).unwrap().tx, 4);
}

fn msr(port: usize, levels: u8, changed: u16) -> EventRecord {
    EventRecord {
        port,
        event: Event::Msr { levels, changed },
    }
}

#[test]
fn test_cts_flow_control_gates_transmit() {
    let (session, mock) = attach_1410();
    let recorder = Arc::new(Recorder::default());
    session.set_listener(recorder.clone());
    session.open(0).unwrap();

    let settings = LineSettings {
        flow: FlowControl::RTS_CTS,
        ..Default::default()
    };
    session
        .set_termios(0, Termios::from_settings(&settings).unwrap())
        .unwrap();
    assert_eq!(
        mock.requests_of(RQ_VENDOR_SET_RTS).last().unwrap().value,
        MX_RTS_HW
    );

    // No MSR event yet, so CTS is unknown and nothing is held
    assert!(session.holds(0).unwrap().is_empty());
    session.write(0, b"hello").unwrap();
    assert_eq!(mock.take_bulk_out().len(), 1);
    write_done(&session, 0);

    // CTS reported low holds transmission
    feed_events(&session, &[msr(0, 0, SERIAL_EV_CTS)]);
    assert!(session.holds(0).unwrap().contains(MX_WAIT_FOR_CTS));
    session.write(0, b"data").unwrap();
    assert!(mock.take_bulk_out().is_empty());

    feed_events(&session, &[msr(0, UART_MSR_CTS, SERIAL_EV_CTS)]);
    assert!(session.holds(0).unwrap().is_empty());
    assert_eq!(mock.take_bulk_out().len(), 1);
    assert_eq!(session.icount(0).unwrap().cts, 2);
    assert_eq!(*recorder.modem.lock(), vec![(0, 0), (0, UART_MSR_CTS)]);
    assert_ne!(session.tiocmget(0).unwrap() & TIOCM_CTS, 0);
}

#[test]
fn test_reopen_forgets_reported_cts() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();
    let settings = LineSettings {
        flow: FlowControl::RTS_CTS,
        ..Default::default()
    };
    session
        .set_termios(0, Termios::from_settings(&settings).unwrap())
        .unwrap();
    feed_events(&session, &[msr(0, 0, SERIAL_EV_CTS)]);
    assert!(session.holds(0).unwrap().contains(MX_WAIT_FOR_CTS));
    session.close(0).unwrap();

    session.open(0).unwrap();
    assert!(session.holds(0).unwrap().is_empty());
    session.write(0, b"again").unwrap();
    assert_eq!(mock.take_bulk_out().len(), 1);
}

#[test]
fn test_xoff_event_holds_transmit() {
    let (session, mock) = attach_1410();
    session.open(3).unwrap();

    feed_events(
        &session,
        &[EventRecord {
            port: 3,
            event: Event::Mcr { xoff_hold: true },
        }],
    );
    session.write(3, b"held").unwrap();
    assert!(mock.take_bulk_out().is_empty());

    feed_events(
        &session,
        &[EventRecord {
            port: 3,
            event: Event::Mcr { xoff_hold: false },
        }],
    );
    assert_eq!(mock.take_bulk_out().len(), 1);
}

#[test]
fn test_line_status_errors_accumulate() {
    let (session, _mock) = attach_1410();
    session.open(1).unwrap();

    feed_events(
        &session,
        &[
            EventRecord {
                port: 1,
                event: Event::Lsr {
                    lsr: UART_LSR_PE | UART_LSR_FE,
                },
            },
            EventRecord {
                port: 1,
                event: Event::Lsr { lsr: UART_LSR_BI },
            },
        ],
    );

    let icount = session.icount(1).unwrap();
    assert_eq!(icount.parity, 1);
    assert_eq!(icount.frame, 1);
    assert_eq!(icount.brk, 1);
    assert_eq!(icount.overrun, 0);
    assert_eq!(
        session.take_line_errors(1).unwrap(),
        UART_LSR_PE | UART_LSR_FE | UART_LSR_BI
    );
    assert_eq!(session.take_line_errors(1).unwrap(), 0);
}

#[test]
fn test_events_for_closed_or_invalid_ports_ignored() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();
    let submits = mock.read_submits(Pipe::Event);

    feed_events(
        &session,
        &[
            EventRecord {
                port: 2,
                event: Event::Lsr { lsr: UART_LSR_OE },
            },
            EventRecord {
                port: 40,
                event: Event::Lsr { lsr: UART_LSR_OE },
            },
            EventRecord {
                port: 0,
                event: Event::Lsr { lsr: UART_LSR_OE },
            },
        ],
    );

    assert_eq!(session.icount(0).unwrap().overrun, 1);
    assert_eq!(session.icount(2).unwrap().overrun, 0);
    assert_eq!(mock.read_submits(Pipe::Event), submits + 1);
}

#[test]
fn test_reads_follow_device_open_count() {
    let (session, mock) = attach_1410();
    assert!(!mock.read_in_flight(Pipe::Data));

    session.open(0).unwrap();
    session.open(1).unwrap();
    assert!(mock.read_in_flight(Pipe::Data));
    assert!(mock.read_in_flight(Pipe::Event));
    assert_eq!(mock.read_submits(Pipe::Data), 1);

    session.close(0).unwrap();
    assert!(mock.read_in_flight(Pipe::Data));
    assert_eq!(mock.read_kills(Pipe::Data), 0);

    session.close(1).unwrap();
    assert!(!mock.read_in_flight(Pipe::Data));
    assert!(!mock.read_in_flight(Pipe::Event));
    assert_eq!(mock.read_kills(Pipe::Event), 1);
    assert!(!session.is_open(1));
}

#[test]
fn test_open_and_close_program_the_port() {
    let (session, mock) = attach_1410();
    session.open(2).unwrap();

    let opens = mock.requests_of(RQ_VENDOR_SET_OPEN);
    assert_eq!(opens.len(), 1);
    assert_eq!((opens[0].value, opens[0].index), (1, 2));
    assert_eq!(mock.count(RQ_VENDOR_SET_FIFO_DISABLE), 1);
    assert_eq!(mock.count(RQ_VENDOR_SET_HIGH_PERFOR), 1);
    assert_eq!(mock.requests_of(RQ_VENDOR_SET_DTR).last().unwrap().value, 1);

    // A second open of the same port doesn't reprogram it
    session.open(2).unwrap();
    assert_eq!(mock.count(RQ_VENDOR_SET_OPEN), 1);

    session.close(2).unwrap();
    assert!(session.is_open(2));
    session.close(2).unwrap();
    let opens = mock.requests_of(RQ_VENDOR_SET_OPEN);
    assert_eq!(opens.len(), 2);
    assert_eq!(opens[1].value, 0);

    assert!(matches!(
        session.close(2),
        Err(Error::Port {
            kind: PortError::NotOpen { port: 2 }
        })
    ));
}

#[test]
fn test_close_discards_queued_data() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();
    session.stop_tx(0).unwrap();
    session.write(0, b"never sent").unwrap();
    feed_data(&session, &[(0, b"unread")]);

    session.close(0).unwrap();
    session.open(0).unwrap();
    assert_eq!(session.rx_depth(0).unwrap(), 0);
    assert_eq!(session.chars_in_buffer(0).unwrap(), 0);
    assert!(mock.take_bulk_out().is_empty());
}

#[test]
fn test_operations_on_closed_or_invalid_ports() {
    let (session, _mock) = attach_1410();
    assert!(matches!(
        session.write(1, b"x"),
        Err(Error::Port {
            kind: PortError::NotOpen { port: 1 }
        })
    ));
    assert!(matches!(
        session.open(4),
        Err(Error::Port {
            kind: PortError::Invalid {
                port: 4,
                num_ports: 4
            }
        })
    ));
}

#[test]
fn test_unknown_ioctl_is_enoioctlcmd() {
    let (session, _mock) = attach_1410();
    session.open(0).unwrap();
    let err = session.ioctl(0, 0x5401, 0).unwrap_err();
    assert_eq!(err.to_status(), -ENOIOCTLCMD);
}

#[test]
fn test_ioctl_modem_lines() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();
    mock.clear_requests();

    session.ioctl(0, TIOCMBIC, TIOCM_DTR).unwrap();
    assert_eq!(mock.requests_of(RQ_VENDOR_SET_DTR)[0].value, 0);
    let IoctlResult::Value(bits) = session.ioctl(0, TIOCMGET, 0).unwrap() else {
        panic!("TIOCMGET returned no value");
    };
    assert_eq!(bits & TIOCM_DTR, 0);
    assert_ne!(bits & TIOCM_RTS, 0);

    // Setting what is already set sends nothing
    session.ioctl(0, TIOCMBIS, TIOCM_RTS).unwrap();
    assert_eq!(mock.count(RQ_VENDOR_SET_RTS), 0);

    assert!(matches!(
        session.ioctl(0, TIOCGICOUNT, 0).unwrap(),
        IoctlResult::Counters(_)
    ));
}

#[test]
fn test_interface_selection() {
    let (session, _mock) = attach_1410();
    assert!(matches!(
        session.set_interface(0, InterfaceMode::Rs422),
        Err(Error::Port {
            kind: PortError::InterfaceUnsupported { port: 0, .. }
        })
    ));
    session.set_interface(0, InterfaceMode::Rs232).unwrap();

    let (session, mock) = attach_with(UPORT1450_PID, fast_config());
    session.set_interface(1, InterfaceMode::Rs485FourWire).unwrap();
    assert_eq!(mock.count(RQ_VENDOR_SET_INTERFACE), 0);

    session.open(1).unwrap();
    let sent = mock.requests_of(RQ_VENDOR_SET_INTERFACE);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].value, MX_INT_4W_RS485);
    assert_eq!(
        session.ioctl(1, MOXA_GET_OP_MODE, 0).unwrap(),
        IoctlResult::Value(u32::from(MX_INT_4W_RS485))
    );
}

#[test]
fn test_special_baud_until_next_termios() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();

    session.ioctl(0, MOXA_SET_SPECIAL_BAUD_RATE, 250000).unwrap();
    assert_eq!(
        session.ioctl(0, MOXA_GET_SPECIAL_BAUD_RATE, 0).unwrap(),
        IoctlResult::Value(250000)
    );
    assert_eq!(
        mock.requests_of(RQ_VENDOR_SET_BAUD).last().unwrap().data,
        250000u32.to_le_bytes().to_vec()
    );

    let settings = LineSettings {
        baud: 19200,
        ..Default::default()
    };
    session
        .set_termios(0, Termios::from_settings(&settings).unwrap())
        .unwrap();
    assert_eq!(session.baud(0).unwrap(), 19200);
}

#[test]
fn test_wait_until_sent_polls_device() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();

    mock.push_response(RQ_VENDOR_GET_OUTQUEUE, 10u32.to_be_bytes().to_vec());
    mock.push_response(RQ_VENDOR_GET_OUTQUEUE, 0u32.to_be_bytes().to_vec());
    assert_eq!(session.wait_until_sent(0).unwrap(), DrainStatus::Drained);
    assert_eq!(mock.count(RQ_VENDOR_GET_OUTQUEUE), 2);
}

#[test]
fn test_wait_until_sent_gives_up() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();

    mock.push_response(RQ_VENDOR_GET_OUTQUEUE, 1u32.to_be_bytes().to_vec());
    assert_eq!(session.wait_until_sent(0).unwrap(), DrainStatus::TimedOut);
    assert_eq!(mock.count(RQ_VENDOR_GET_OUTQUEUE), 4);
}

#[test]
fn test_wait_modem_change_times_out() {
    let (session, _mock) = attach_1410();
    session.open(0).unwrap();
    assert!(matches!(
        session.wait_modem_change(0, TIOCM_CTS, Some(Duration::from_millis(10))),
        Err(Error::Timeout { .. })
    ));
}

#[test]
fn test_close_wakes_modem_waiter() {
    let (session, _mock) = attach_1410();
    let session = Arc::new(session);
    session.open(1).unwrap();

    let waiter = {
        let session = session.clone();
        std::thread::spawn(move || session.wait_modem_change(1, TIOCM_CTS, None))
    };
    std::thread::sleep(Duration::from_millis(50));
    session.close(1).unwrap();

    assert!(matches!(
        waiter.join().unwrap(),
        Err(Error::Port {
            kind: PortError::NotOpen { port: 1 }
        })
    ));
}

#[test]
fn test_disconnect_wakes_modem_waiter() {
    let (session, _mock) = attach_1410();
    let session = Arc::new(session);
    session.open(2).unwrap();

    let waiter = {
        let session = session.clone();
        std::thread::spawn(move || session.wait_modem_change(2, TIOCM_DSR, None))
    };
    std::thread::sleep(Duration::from_millis(50));
    session.disconnect();

    let err = waiter.join().unwrap().unwrap_err();
    assert_eq!(err.to_errno(), libc::ENODEV);
}

#[test]
fn test_wait_modem_change_sees_event() {
    let (session, _mock) = attach_1410();
    let session = Arc::new(session);
    session.open(0).unwrap();

    let waiter = {
        let session = session.clone();
        std::thread::spawn(move || {
            session.wait_modem_change(0, TIOCM_DSR | TIOCM_CAR, Some(Duration::from_secs(5)))
        })
    };
    std::thread::sleep(Duration::from_millis(50));
    feed_events(
        &session,
        &[EventRecord {
            port: 0,
            event: Event::Msr {
                levels: UART_MSR_DSR,
                changed: SERIAL_EV_DSR,
            },
        }],
    );
    assert_eq!(waiter.join().unwrap().unwrap(), TIOCM_DSR);
}

#[test]
fn test_flush_purges_device_and_queues() {
    let (session, mock) = attach_1410();
    session.open(1).unwrap();
    feed_data(&session, &[(1, b"stale")]);

    session.ioctl(1, TCFLSH, TCIFLUSH).unwrap();
    assert_eq!(session.rx_depth(1).unwrap(), 0);
    let purge = mock.requests_of(RQ_VENDOR_PURGE);
    assert_eq!((purge[0].value, purge[0].index), (PURGE_IN, 1));

    assert!(matches!(
        session.flush(1, 7),
        Err(Error::Args { .. })
    ));
}

#[test]
fn test_device_gone_fails_operations() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();

    session.handle_completion(Completion::ReadError {
        pipe: Pipe::Data,
        error: mxuport::DeviceAccessError::NoDevice.into(),
    });
    assert!(!session.is_attached());
    assert!(!mock.read_in_flight(Pipe::Event));
    assert!(session.write(0, b"x").is_err());

    // Close still tears down locally
    session.close(0).unwrap();
    assert!(!session.is_open(0));
}

#[test]
fn test_transient_read_error_resubmits() {
    let (session, mock) = attach_1410();
    session.open(0).unwrap();
    let submits = mock.read_submits(Pipe::Event);

    session.handle_completion(Completion::ReadError {
        pipe: Pipe::Event,
        error: Error::Timeout {
            dur: Duration::from_millis(1),
        },
    });
    assert!(session.is_attached());
    assert_eq!(mock.read_submits(Pipe::Event), submits + 1);
}

#[test]
fn test_port_info_snapshot() {
    let (session, _mock) = attach_1410();
    session.open(3).unwrap();
    feed_data(&session, &[(3, b"xyz")]);

    let info = session.port_info(3).unwrap();
    assert!(info.open);
    assert_eq!(info.port, 3);
    assert_eq!(info.settings.baud, 9600);
    assert_eq!(info.rx_depth, 3);
    assert_eq!(info.icount.rx, 3);
    assert!(info.holds.is_empty());
}
