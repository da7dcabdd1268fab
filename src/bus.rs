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

//! IEEE-488 bus command decoder
//!
//! Reconstructs addressed talker/listener dialogues from the stream of
//! tagged bus bytes and signal changes. Bit 0 of the signal vector is ATN;
//! a DATA byte with ATN asserted (low) is a bus command byte.

use std::fmt;

use crate::protocol::{Msg, MsgType};

/// A raw bus command, before Amigo-level interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCmd {
    Identify,
    ParallelPoll(bool),
    DeviceClear,
    Talk(u8),
    Listen { sa: u8, params: Vec<u8> },
}

impl fmt::Display for BusCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusCmd::Identify => write!(f, "IDENTIFY"),
            BusCmd::ParallelPoll(en) => write!(f, "PP {}", u8::from(*en)),
            BusCmd::DeviceClear => write!(f, "CLEAR"),
            BusCmd::Talk(sa) => write!(f, "TALK {:02x}:", sa),
            BusCmd::Listen { sa, params } => {
                write!(f, "LISTEN {:02x}:", sa)?;
                for b in params {
                    write!(f, "{:02x} ", b)?;
                }
                Ok(())
            }
        }
    }
}

// Secondary address tracking: which primary came last
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaState {
    None,
    Pacs,
    Tpas,
    Lpas,
    Unt,
}

// Pending-command emission state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecState {
    Idle,
    // Talk/Identify latched, waiting for ATN release
    MtaSa,
    // Listen latched, collecting parameters until EOI
    MlaSa,
}

pub struct BusDecoder {
    my_mta: u8,
    my_mla: u8,
    my_msa: u8,
    sa_state: SaState,
    dec_state: DecState,
    talker: bool,
    listener: bool,
    pp_state: bool,
    signals: u8,
    pending: Option<BusCmd>,
}

impl BusDecoder {
    pub fn new(hpib_address: u8) -> BusDecoder {
        BusDecoder {
            my_mta: (hpib_address & 0x1f) | 0x40,
            my_mla: (hpib_address & 0x1f) | 0x20,
            my_msa: (hpib_address & 0x1f) | 0x60,
            sa_state: SaState::None,
            dec_state: DecState::Idle,
            talker: false,
            listener: false,
            pp_state: false,
            signals: 0xff,
            pending: None,
        }
    }

    // Re-enable parallel poll when the drive loses its addressed role
    fn pp_claim(&mut self) -> Option<BusCmd> {
        if !self.pp_state {
            self.pp_state = true;
            Some(BusCmd::ParallelPoll(true))
        } else {
            None
        }
    }

    // Drop parallel poll when the drive becomes addressed
    fn pp_release(&mut self) -> Option<BusCmd> {
        if self.pp_state {
            self.pp_state = false;
            Some(BusCmd::ParallelPoll(false))
        } else {
            None
        }
    }

    /// Advance the decoder by one message; at most one raw command is
    /// produced per message
    pub fn feed(&mut self, msg: Msg) -> Option<BusCmd> {
        match msg.msg_type {
            MsgType::SignalClear => self.signals &= !msg.data,
            MsgType::SignalSet => self.signals |= msg.data,
            // PP replies are sent on drive state changes, not on request
            MsgType::PpRequest => return None,
            _ => {}
        }
        let is_cmd = (self.signals & 1) == 0 && msg.msg_type == MsgType::DataByte;
        if is_cmd {
            let data = msg.data & 0x7f;
            let is_pcg = (data & 0x60) != 0x60;
            if is_pcg {
                self.sa_state = SaState::None;
            }
            if data == 0x05 && self.listener {
                // Parallel poll configure
                self.sa_state = SaState::Pacs;
            } else if data == 0x15 {
                // Parallel poll unconfigure, not modelled
            } else if self.listener && data == 0x3f {
                // UNL
                self.listener = false;
                self.dec_state = DecState::Idle;
                if let Some(cmd) = self.pp_claim() {
                    return Some(cmd);
                }
            } else if data == 0x5f {
                // UNT
                self.talker = false;
                self.dec_state = DecState::Idle;
                self.sa_state = SaState::Unt;
                if let Some(cmd) = self.pp_claim() {
                    return Some(cmd);
                }
            } else if data == self.my_mla {
                // MLA
                self.listener = true;
                self.dec_state = DecState::Idle;
                self.sa_state = SaState::Lpas;
            } else if data == self.my_mta {
                // MTA
                self.talker = true;
                self.dec_state = DecState::Idle;
                self.sa_state = SaState::Tpas;
            } else if self.talker && (data & 0x60) == 0x40 {
                // Some other device addressed to talk
                self.talker = false;
                self.dec_state = DecState::Idle;
                if let Some(cmd) = self.pp_claim() {
                    return Some(cmd);
                }
            } else if (self.listener && data == 0x04) || data == 0x14 {
                // SDC / DCL
                self.dec_state = DecState::Idle;
                return Some(BusCmd::DeviceClear);
            } else if !is_pcg {
                match self.sa_state {
                    SaState::Pacs => {
                        // PPE/PPD byte, consumed silently
                    }
                    SaState::Tpas => {
                        self.dec_state = DecState::MtaSa;
                        self.pending = Some(BusCmd::Talk(data & 0x1f));
                        if let Some(cmd) = self.pp_release() {
                            return Some(cmd);
                        }
                    }
                    SaState::Lpas => {
                        self.dec_state = DecState::MlaSa;
                        self.pending = Some(BusCmd::Listen {
                            sa: data & 0x1f,
                            params: Vec::new(),
                        });
                        if let Some(cmd) = self.pp_release() {
                            return Some(cmd);
                        }
                    }
                    SaState::Unt => {
                        if data == self.my_msa {
                            self.pending = Some(BusCmd::Identify);
                            self.dec_state = DecState::MtaSa;
                        }
                    }
                    SaState::None => {}
                }
            }
        }
        match self.dec_state {
            DecState::MtaSa => {
                if (self.signals & 1) != 0 {
                    // ATN released, command takes effect
                    self.dec_state = DecState::Idle;
                    return self.pending.take();
                }
            }
            DecState::MlaSa => {
                if self.listener && !is_cmd {
                    if msg.msg_type == MsgType::DataByte || msg.msg_type == MsgType::EndByte {
                        if let Some(BusCmd::Listen { params, .. }) = self.pending.as_mut() {
                            params.push(msg.data);
                        }
                    }
                    if msg.msg_type == MsgType::EndByte {
                        self.dec_state = DecState::Idle;
                        return self.pending.take();
                    }
                }
            }
            DecState::Idle => {}
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
