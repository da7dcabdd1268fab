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

//! Remotizer wire protocol: message types and framing
//!
//! Each message travels as one ASCII frame, `<type>':'<hex><hex>` followed
//! by a terminator (`,`, `;` or whitespace). Outbound frames always use
//! `'\n'` as the terminator.

use std::fmt;

/// Types of messages exchanged with the bus remotizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// Clear bus signal(s) - 'R'
    SignalClear,
    /// Set bus signal(s) - 'S'
    SignalSet,
    /// Command/data byte without EOI - 'D'
    DataByte,
    /// Data byte with EOI - 'E'
    EndByte,
    /// Parallel poll state (outbound only) - 'P'
    PpData,
    /// Request for parallel poll state (inbound only) - 'Q'
    PpRequest,
    /// Heartbeat: echo request - 'J'
    EchoReq,
    /// Heartbeat: echo reply - 'K'
    EchoReply,
}

impl MsgType {
    pub fn to_wire(self) -> u8 {
        match self {
            MsgType::SignalClear => b'R',
            MsgType::SignalSet => b'S',
            MsgType::DataByte => b'D',
            MsgType::EndByte => b'E',
            MsgType::PpData => b'P',
            MsgType::PpRequest => b'Q',
            MsgType::EchoReq => b'J',
            MsgType::EchoReply => b'K',
        }
    }

    /// Recognize the type letter of an inbound message
    pub fn from_wire(ch: u8) -> Option<MsgType> {
        match ch {
            b'R' => Some(MsgType::SignalClear),
            b'S' => Some(MsgType::SignalSet),
            b'D' => Some(MsgType::DataByte),
            b'E' => Some(MsgType::EndByte),
            b'Q' => Some(MsgType::PpRequest),
            b'J' => Some(MsgType::EchoReq),
            _ => None,
        }
    }
}

/// A single remotizer message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg {
    pub msg_type: MsgType,
    pub data: u8,
}

impl Msg {
    pub fn new(msg_type: MsgType, data: u8) -> Msg {
        Msg { msg_type, data }
    }

    /// Append the outbound frame for this message to `out`
    pub fn format_to(&self, out: &mut String) {
        use std::fmt::Write;
        // Infallible on String
        let _ = writeln!(out, "{}:{:02x}", self.msg_type.to_wire() as char, self.data);
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02x}", self.msg_type.to_wire() as char, self.data)
    }
}

/// Match message terminator characters
pub fn is_terminator(ch: u8) -> bool {
    ch == b',' || ch == b';'
}

/// Match whitespace characters
pub fn is_space(ch: u8) -> bool {
    ch == b' ' || ch == b'\t' || ch == b'\r' || ch == b'\n'
}

/// Decode one hex digit, upper- or lower-case
pub fn hex_digit(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let mut s = String::new();
        Msg::new(MsgType::PpData, 0x80).format_to(&mut s);
        Msg::new(MsgType::DataByte, 0x0a).format_to(&mut s);
        assert_eq!(s, "P:80\nD:0a\n");
    }

    #[test]
    fn test_wire_round_trip() {
        for t in [
            MsgType::SignalClear,
            MsgType::SignalSet,
            MsgType::DataByte,
            MsgType::EndByte,
            MsgType::PpRequest,
            MsgType::EchoReq,
        ] {
            assert_eq!(MsgType::from_wire(t.to_wire()), Some(t));
        }
        // Outbound-only types are not recognized on receive
        assert_eq!(MsgType::from_wire(b'P'), None);
        assert_eq!(MsgType::from_wire(b'K'), None);
        assert_eq!(MsgType::from_wire(b'X'), None);
    }

    #[test]
    fn test_hex_digit() {
        assert_eq!(hex_digit(b'0'), Some(0));
        assert_eq!(hex_digit(b'9'), Some(9));
        assert_eq!(hex_digit(b'a'), Some(10));
        assert_eq!(hex_digit(b'F'), Some(15));
        assert_eq!(hex_digit(b'g'), None);
        assert_eq!(hex_digit(b':'), None);
    }
}
