// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Framed message I/O with the remotizer peer
//!
//! A dedicated receiver thread parses the inbound byte stream into
//! messages and feeds a queue; heartbeat requests are answered from the
//! receive path and never reach consumers. All outbound sends are
//! serialised on one lock, so a batch is seen contiguously by the peer.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::protocol::{hex_digit, is_space, is_terminator, Msg, MsgType};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum LinkError {
    ConnectionClosed,
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::ConnectionClosed => write!(f, "Connection closed by peer"),
        }
    }
}

impl std::error::Error for LinkError {}

// ============================================================================
// Inbound Framing Parser
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    WaitCh,
    WaitColon,
    Wait1stHex,
    Wait2ndHex,
    WaitSep,
    // Recovery: eat everything up to the next separator
    WaitWs,
}

pub struct FrameParser {
    state: RxState,
    msg_type: Option<MsgType>,
    data: u8,
}

impl FrameParser {
    pub fn new() -> FrameParser {
        FrameParser {
            state: RxState::WaitCh,
            msg_type: None,
            data: 0,
        }
    }

    /// Advance the parser by one byte, returning a message when a complete
    /// frame has been seen
    pub fn feed(&mut self, ch: u8) -> Option<Msg> {
        match self.state {
            RxState::WaitCh => {
                if let Some(t) = MsgType::from_wire(ch) {
                    self.msg_type = Some(t);
                    self.state = RxState::WaitColon;
                } else if !is_space(ch) {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::WaitColon => {
                if ch == b':' {
                    self.state = RxState::Wait1stHex;
                } else {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::Wait1stHex => {
                if let Some(d) = hex_digit(ch) {
                    self.data = d;
                    self.state = RxState::Wait2ndHex;
                } else {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::Wait2ndHex => {
                if let Some(d) = hex_digit(ch) {
                    self.data = (self.data << 4) | d;
                    self.state = RxState::WaitSep;
                } else {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::WaitSep => {
                if is_terminator(ch) || is_space(ch) {
                    self.state = RxState::WaitCh;
                    if let Some(msg_type) = self.msg_type.take() {
                        return Some(Msg::new(msg_type, self.data));
                    }
                } else {
                    self.state = RxState::WaitWs;
                }
            }
            RxState::WaitWs => {
                if is_terminator(ch) || is_space(ch) {
                    self.state = RxState::WaitCh;
                }
            }
        }
        None
    }
}

// ============================================================================
// Message Link
// ============================================================================

struct Inbox {
    q: VecDeque<Msg>,
    closed: bool,
}

pub struct MsgLink {
    writer: Mutex<Box<dyn Write + Send>>,
    inbox: Mutex<Inbox>,
    avail: Condvar,
}

impl MsgLink {
    pub fn new(writer: Box<dyn Write + Send>) -> Arc<MsgLink> {
        Arc::new(MsgLink {
            writer: Mutex::new(writer),
            inbox: Mutex::new(Inbox {
                q: VecDeque::new(),
                closed: false,
            }),
            avail: Condvar::new(),
        })
    }

    /// Spawn the receiver thread over `reader`. When the peer closes or the
    /// read fails the queue is marked closed and the thread ends.
    pub fn start_receiver(self: Arc<Self>, mut reader: Box<dyn Read + Send>) -> thread::JoinHandle<()> {
        let link = self;
        thread::spawn(move || {
            let mut parser = FrameParser::new();
            let mut buffer = [0u8; 256];
            loop {
                let n = match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::debug!("receive failed: {}", e);
                        break;
                    }
                };
                for &ch in &buffer[..n] {
                    if let Some(msg) = parser.feed(ch) {
                        if msg.msg_type == MsgType::EchoReq {
                            // Heartbeat is answered right here, consumers
                            // never see it
                            link.send_msg(Msg::new(MsgType::EchoReply, 0));
                        } else {
                            link.push_msg(msg);
                        }
                    }
                }
            }
            link.close_inbox();
        })
    }

    /// Wait for the next inbound message. Already-queued messages are
    /// drained before a closed connection is reported.
    pub fn get_msg(&self) -> Result<Msg, LinkError> {
        let mut inbox = self.inbox.lock().unwrap();
        loop {
            if let Some(msg) = inbox.q.pop_front() {
                return Ok(msg);
            }
            if inbox.closed {
                return Err(LinkError::ConnectionClosed);
            }
            inbox = self.avail.wait(inbox).unwrap();
        }
    }

    pub fn send_msg(&self, msg: Msg) {
        let mut s = String::new();
        msg.format_to(&mut s);
        self.send_str(&s);
    }

    /// Send a run of data bytes as one contiguous batch, optionally tagging
    /// the last byte with EOI
    pub fn send_data(&self, data: &[u8], eoi_at_end: bool) {
        let mut s = String::new();
        for (i, &b) in data.iter().enumerate() {
            let msg_type = if eoi_at_end && i + 1 == data.len() {
                MsgType::EndByte
            } else {
                MsgType::DataByte
            };
            Msg::new(msg_type, b).format_to(&mut s);
        }
        if !s.is_empty() {
            self.send_str(&s);
        }
    }

    pub fn send_end_byte(&self, byte: u8) {
        self.send_msg(Msg::new(MsgType::EndByte, byte));
    }

    pub fn send_pp_state(&self, pp_state: u8) {
        self.send_msg(Msg::new(MsgType::PpData, pp_state));
    }

    fn send_str(&self, s: &str) {
        let mut writer = self.writer.lock().unwrap();
        // A dead peer is noticed by the receiver; nothing to do here
        if let Err(e) = writer.write_all(s.as_bytes()).and_then(|_| writer.flush()) {
            log::debug!("send failed: {}", e);
        }
    }

    fn push_msg(&self, msg: Msg) {
        let mut inbox = self.inbox.lock().unwrap();
        inbox.q.push_back(msg);
        self.avail.notify_one();
    }

    fn close_inbox(&self) {
        let mut inbox = self.inbox.lock().unwrap();
        inbox.closed = true;
        self.avail.notify_all();
    }
}

// ============================================================================
// Capture Writer for Testing
// ============================================================================

#[cfg(test)]
#[derive(Clone)]
pub struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

#[cfg(test)]
impl CaptureWriter {
    pub fn new() -> CaptureWriter {
        CaptureWriter {
            buf: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Everything written so far, as frame text
    pub fn contents(&self) -> String {
        String::from_utf8(self.buf.lock().unwrap().clone()).expect("frames are ASCII")
    }

    pub fn clear(&self) {
        self.buf.lock().unwrap().clear();
    }
}

#[cfg(test)]
impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse_all(input: &[u8]) -> Vec<Msg> {
        let mut parser = FrameParser::new();
        input.iter().filter_map(|&ch| parser.feed(ch)).collect()
    }

    #[test]
    fn test_parser_basic() {
        let msgs = parse_all(b"D:a5,E:00;R:01 S:FF\n");
        assert_eq!(
            msgs,
            vec![
                Msg::new(MsgType::DataByte, 0xa5),
                Msg::new(MsgType::EndByte, 0x00),
                Msg::new(MsgType::SignalClear, 0x01),
                Msg::new(MsgType::SignalSet, 0xff),
            ]
        );
    }

    #[test]
    fn test_parser_leading_whitespace() {
        let msgs = parse_all(b"  \t\r\n D:12,");
        assert_eq!(msgs, vec![Msg::new(MsgType::DataByte, 0x12)]);
    }

    #[test]
    fn test_parser_resync_on_bad_hex() {
        // First frame has a bad hex digit; parser recovers at the
        // terminator and picks up the second frame
        let msgs = parse_all(b"D:xz,D:12,");
        assert_eq!(msgs, vec![Msg::new(MsgType::DataByte, 0x12)]);
    }

    #[test]
    fn test_parser_resync_on_unknown_type() {
        let msgs = parse_all(b"Z:00,garbage here;E:7f,");
        assert_eq!(msgs, vec![Msg::new(MsgType::EndByte, 0x7f)]);
    }

    #[test]
    fn test_parser_missing_colon() {
        let msgs = parse_all(b"D12,D:34,");
        assert_eq!(msgs, vec![Msg::new(MsgType::DataByte, 0x34)]);
    }

    #[test]
    fn test_parser_overlong_frame() {
        // Extra hex digits before the terminator invalidate the frame
        let msgs = parse_all(b"D:123,D:45,");
        assert_eq!(msgs, vec![Msg::new(MsgType::DataByte, 0x45)]);
    }

    #[test]
    fn test_link_receive_and_heartbeat() {
        let writer = CaptureWriter::new();
        let link = MsgLink::new(Box::new(writer.clone()));
        let handle = Arc::clone(&link)
            .start_receiver(Box::new(Cursor::new(b"J:00,D:a5;R:01 ".to_vec())));

        // Heartbeat is consumed by the receiver; only the other two
        // messages are queued
        assert_eq!(link.get_msg().unwrap(), Msg::new(MsgType::DataByte, 0xa5));
        assert_eq!(link.get_msg().unwrap(), Msg::new(MsgType::SignalClear, 0x01));
        assert!(matches!(link.get_msg(), Err(LinkError::ConnectionClosed)));
        // Closed state is sticky
        assert!(matches!(link.get_msg(), Err(LinkError::ConnectionClosed)));

        handle.join().unwrap();
        assert_eq!(writer.contents(), "K:00\n");
    }

    #[test]
    fn test_link_send_data_batch() {
        let writer = CaptureWriter::new();
        let link = MsgLink::new(Box::new(writer.clone()));

        link.send_data(&[0x00, 0x81], true);
        assert_eq!(writer.contents(), "D:00\nE:81\n");

        writer.clear();
        link.send_data(&[0x10, 0x20, 0x30], false);
        assert_eq!(writer.contents(), "D:10\nD:20\nD:30\n");

        writer.clear();
        link.send_data(&[], true);
        assert_eq!(writer.contents(), "");
    }

    #[test]
    fn test_link_send_helpers() {
        let writer = CaptureWriter::new();
        let link = MsgLink::new(Box::new(writer.clone()));

        link.send_end_byte(0x02);
        link.send_pp_state(0x80);
        link.send_pp_state(0x00);
        assert_eq!(writer.contents(), "E:02\nP:80\nP:00\n");
    }
}
