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

//! Amigo command layer
//!
//! Interprets raw bus commands into typed Amigo commands. Listen commands
//! are keyed on (secondary address, parameter length, opcode); talk
//! commands on the secondary address alone.

use std::fmt;

use crate::bus::BusCmd;
use crate::geometry::Chs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmigoCmd {
    Identify,
    ParallelPoll(bool),
    DeviceClear,
    UnkTalk(u8),
    SendData,
    SendStatus,
    Dsj,
    UnkListen { sa: u8, params: Vec<u8> },
    ReceiveData(Vec<u8>),
    Seek { unit: u8, chs: Chs },
    ReqStatus { unit: u8 },
    Verify { unit: u8, sec_count: u16 },
    ReqLogAddr,
    End,
    BuffWr { unit: u8 },
    BuffRd { unit: u8 },
    Format { unit: u8, ovr: u8, filler: u8 },
    AmigoClear,
}

impl AmigoCmd {
    pub fn decode(raw: BusCmd) -> AmigoCmd {
        match raw {
            BusCmd::Identify => AmigoCmd::Identify,
            BusCmd::ParallelPoll(enable) => AmigoCmd::ParallelPoll(enable),
            BusCmd::DeviceClear => AmigoCmd::DeviceClear,
            BusCmd::Talk(sa) => match sa {
                0 => AmigoCmd::SendData,
                8 => AmigoCmd::SendStatus,
                0x10 => AmigoCmd::Dsj,
                _ => AmigoCmd::UnkTalk(sa),
            },
            BusCmd::Listen { sa, params } => Self::decode_listen(sa, params),
        }
    }

    fn decode_listen(sa: u8, params: Vec<u8>) -> AmigoCmd {
        let p = params.as_slice();
        match sa {
            0 => return AmigoCmd::ReceiveData(params),
            8 => match p {
                [0x02 | 0x0c, unit, c_hi, c_lo, h, s] => {
                    return AmigoCmd::Seek {
                        unit: *unit,
                        chs: Chs::from_byte_repr(&[*c_hi, *c_lo, *h, *s]),
                    }
                }
                [0x03, unit] => return AmigoCmd::ReqStatus { unit: *unit },
                [0x07, unit, hi, lo] => {
                    return AmigoCmd::Verify {
                        unit: *unit,
                        sec_count: u16::from(*hi) << 8 | u16::from(*lo),
                    }
                }
                [0x14, _unit] => return AmigoCmd::ReqLogAddr,
                [0x15, _unit] => return AmigoCmd::End,
                _ => {}
            },
            9 => {
                if let [0x08, unit] = p {
                    return AmigoCmd::BuffWr { unit: *unit };
                }
            }
            0x0a => match p {
                [0x03, unit] => return AmigoCmd::ReqStatus { unit: *unit },
                [0x05, unit] => return AmigoCmd::BuffRd { unit: *unit },
                [0x14, _unit] => return AmigoCmd::ReqLogAddr,
                _ => {}
            },
            0x0b => {
                // Buffered read/verify behaves as a buffered read
                if let [0x05, unit] = p {
                    return AmigoCmd::BuffRd { unit: *unit };
                }
            }
            0x0c => {
                if let [0x18, unit, ovr, _, filler] = p {
                    return AmigoCmd::Format {
                        unit: *unit,
                        ovr: *ovr,
                        filler: *filler,
                    };
                }
            }
            0x10 => {
                if p.len() == 1 {
                    return AmigoCmd::AmigoClear;
                }
            }
            _ => {}
        }
        AmigoCmd::UnkListen { sa, params }
    }

    /// Whether executing this command re-enables the parallel poll response
    pub fn pp_enable(&self) -> bool {
        !matches!(
            self,
            AmigoCmd::Identify
                | AmigoCmd::ParallelPoll(_)
                | AmigoCmd::DeviceClear
                | AmigoCmd::AmigoClear
        )
    }
}

impl fmt::Display for AmigoCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmigoCmd::Identify => write!(f, "IDENTIFY"),
            AmigoCmd::ParallelPoll(en) => write!(f, "PP {}", u8::from(*en)),
            AmigoCmd::DeviceClear => write!(f, "CLEAR"),
            AmigoCmd::UnkTalk(sa) => write!(f, "UNKNOWN TALK {:02x}", sa),
            AmigoCmd::SendData => write!(f, "SEND DATA"),
            AmigoCmd::SendStatus => write!(f, "SEND ADDR/STATUS"),
            AmigoCmd::Dsj => write!(f, "DSJ"),
            AmigoCmd::UnkListen { sa, params } => {
                write!(f, "UNKNOWN LISTEN {:02x}:", sa)?;
                for b in params {
                    write!(f, "{:02x} ", b)?;
                }
                Ok(())
            }
            AmigoCmd::ReceiveData(data) => write!(f, "RECEIVE DATA: {} bytes", data.len()),
            AmigoCmd::Seek { unit, chs } => write!(f, "SEEK {}:{}", unit, chs),
            AmigoCmd::ReqStatus { unit } => write!(f, "REQ STATUS {}", unit),
            AmigoCmd::Verify { unit, sec_count } => write!(f, "VERIFY {}:{}", unit, sec_count),
            AmigoCmd::ReqLogAddr => write!(f, "REQ LOG ADDRESS"),
            AmigoCmd::End => write!(f, "END"),
            AmigoCmd::BuffWr { unit } => write!(f, "BUFFERED WR {}", unit),
            AmigoCmd::BuffRd { unit } => write!(f, "BUFFERED RD {}", unit),
            AmigoCmd::Format { unit, ovr, filler } => {
                write!(f, "FORMAT {} {:02x} {:02x}", unit, ovr, filler)
            }
            AmigoCmd::AmigoClear => write!(f, "AMIGO CLEAR"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
