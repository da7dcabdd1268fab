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

//! Drive state and command execution

use std::sync::Arc;

use crate::amigo::AmigoCmd;
use crate::geometry::{Chs, Lba};
use crate::image::{BlockImage, SECTOR_SIZE};
use crate::link::MsgLink;

// Error codes reported in stat1
const ERROR_BAD_CMD: u8 = 0x01; // Unknown command
const ERROR_IO: u8 = 0x0a; // I/O error
const ERROR_STAT2: u8 = 0x13; // Some error in stat2
const ERROR_NO_UNIT: u8 = 0x17; // Unit # out of range
const ERROR_ATTENTION: u8 = 0x1f; // Unit attention

// ============================================================================
// Fixed Data of Drives
// ============================================================================

/// Model-specific constants
#[derive(Debug, Clone)]
pub struct FixedData {
    /// Identify sequence (2 bytes)
    pub id: [u8; 2],
    /// Geometry of units
    pub geometry: Chs,
    /// Count of units
    pub units: usize,
    /// Ignore filler byte in format command
    pub ignore_fmt_filler: bool,
}

impl FixedData {
    pub const MODEL_NAMES: [&'static str; 2] = ["9134b", "9895"];

    /// Look up the fixed data of a drive model
    pub fn for_model(model: &str) -> Option<FixedData> {
        match model {
            "9134b" => Some(FixedData {
                id: [0x01, 0x0a],
                geometry: Chs::new(306, 4, 31),
                units: 1,
                ignore_fmt_filler: true,
            }),
            "9895" => Some(FixedData {
                id: [0x00, 0x81],
                geometry: Chs::new(77, 2, 30),
                units: 2,
                ignore_fmt_filler: false,
            }),
            _ => None,
        }
    }
}

// ============================================================================
// Unit State
// ============================================================================

struct UnitState {
    image: Option<Box<dyn BlockImage>>,
    current_lba: Lba,
    a_bit: bool,
    c_bit: bool,
    f_bit: bool,
    w_bit: bool,
    ss: u8,
    tttt: u8,
}

impl UnitState {
    fn new(image: Option<Box<dyn BlockImage>>) -> UnitState {
        let mut unit = UnitState {
            image,
            current_lba: 0,
            a_bit: false,
            c_bit: false,
            f_bit: true,
            w_bit: false,
            ss: 0,
            tttt: 6,
        };
        if !unit.is_ready() {
            // Drive not ready
            unit.ss = 3;
            unit.f_bit = false;
        }
        unit
    }

    fn is_ready(&self) -> bool {
        self.image.is_some()
    }

    fn read_img(&mut self) -> Vec<u8> {
        let mut sector = [0u8; SECTOR_SIZE];
        if let Some(image) = self.image.as_mut() {
            if let Err(e) = image.read_sector(self.current_lba, &mut sector) {
                log::warn!("image read failed at lba {}: {}", self.current_lba, e);
            }
            self.current_lba += 1;
        }
        sector.to_vec()
    }

    /// Write one sector, truncating or zero-padding `data` to sector size
    fn write_img(&mut self, data: &[u8]) {
        if let Some(image) = self.image.as_mut() {
            let mut sector = [0u8; SECTOR_SIZE];
            let len = data.len().min(SECTOR_SIZE);
            sector[..len].copy_from_slice(&data[..len]);
            if let Err(e) = image.write_sector(self.current_lba, &sector) {
                log::warn!("image write failed at lba {}: {}", self.current_lba, e);
            }
            self.current_lba += 1;
        }
    }

    fn format_img(&mut self, filler: u8, sectors: Lba) {
        if let Some(image) = self.image.as_mut() {
            if let Err(e) = image.format(sectors, filler) {
                log::warn!("image format failed: {}", e);
            }
            self.current_lba = 0;
        }
    }

    /// Status byte pair of this unit
    fn to_byte_repr(&self) -> [u8; 2] {
        let mut b0 = self.tttt << 1;
        if self.c_bit || self.ss != 0 {
            b0 |= 0x80;
        }
        let mut b1 = self.ss;
        if self.a_bit {
            b1 |= 0x80;
        }
        if self.w_bit {
            b1 |= 0x40;
        }
        if self.f_bit {
            b1 |= 0x08;
        }
        if self.c_bit {
            b1 |= 0x04;
        }
        [b0, b1]
    }
}

// ============================================================================
// Drive State
// ============================================================================

// Command sequencing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqState {
    // Not waiting for a particular cmd
    Idle,
    // Waiting for send addr/status cmd
    WaitSendStatus,
    // Waiting for send data cmd
    WaitSendData,
    // Waiting for receive data cmd
    WaitReceiveData,
    // Waiting for clear cmd
    WaitClear,
}

pub struct DriveState {
    io: Arc<MsgLink>,
    fixed: FixedData,
    units: Vec<UnitState>,
    dsj: u8,
    stat1: u8,
    current_unit: usize,
    failed_unit: usize,
    pp_enabled: bool,
    pp_state: bool,
    status: [u8; 4],
    buffer: Vec<u8>,
    seq_state: SeqState,
}

impl DriveState {
    /// `images` carries one entry per unit, `None` for a unit without a
    /// mounted image (comes up not-ready)
    pub fn new(
        io: Arc<MsgLink>,
        fixed: FixedData,
        images: Vec<Option<Box<dyn BlockImage>>>,
    ) -> DriveState {
        DriveState {
            io,
            fixed,
            units: images.into_iter().map(UnitState::new).collect(),
            dsj: 2,
            stat1: 0,
            current_unit: 0,
            failed_unit: 0,
            pp_enabled: true,
            pp_state: false,
            status: [0; 4],
            buffer: Vec::new(),
            seq_state: SeqState::Idle,
        }
    }

    pub fn exec_cmd(&mut self, cmd: AmigoCmd) {
        let en_pp = cmd.pp_enable();
        if en_pp {
            self.pp_enabled = true;
        }
        self.exec(cmd);
        if en_pp {
            self.set_pp(true);
        }
    }

    fn exec(&mut self, cmd: AmigoCmd) {
        match cmd {
            AmigoCmd::Identify => self.io.send_data(&self.fixed.id, true),
            AmigoCmd::ParallelPoll(enable) => self.set_pp(enable),
            AmigoCmd::DeviceClear => self.amigo_clear(),
            AmigoCmd::UnkTalk(_) => {}
            AmigoCmd::SendData => self.cmd_send_data(),
            AmigoCmd::SendStatus => self.cmd_send_status(),
            AmigoCmd::Dsj => self.cmd_dsj(),
            AmigoCmd::UnkListen { .. } => self.cmd_unknown_listen(),
            AmigoCmd::ReceiveData(data) => self.cmd_receive_data(data),
            AmigoCmd::Seek { unit, chs } => self.cmd_seek(unit, chs),
            AmigoCmd::ReqStatus { unit } => self.cmd_req_status(unit),
            AmigoCmd::Verify { unit, sec_count } => self.cmd_verify(unit, sec_count),
            AmigoCmd::ReqLogAddr => self.cmd_req_log_addr(),
            AmigoCmd::End => self.cmd_end(),
            AmigoCmd::BuffWr { unit } => self.cmd_buff_wr(unit),
            AmigoCmd::BuffRd { unit } => self.cmd_buff_rd(unit),
            AmigoCmd::Format { unit, ovr, filler } => self.cmd_format(unit, ovr, filler),
            AmigoCmd::AmigoClear => self.cmd_amigo_clear(),
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Transmit the parallel poll byte on genuine edges of
    /// `pp_enabled && requested`
    fn set_pp(&mut self, requested: bool) {
        let new_state = self.pp_enabled && requested;
        if new_state != self.pp_state {
            self.pp_state = new_state;
            self.io.send_pp_state(if new_state { 0x80 } else { 0x00 });
        }
    }

    fn set_seq_error(&mut self, talker: bool) {
        self.seq_state = SeqState::Idle;
        if self.dsj == 0 {
            self.set_error(ERROR_IO);
        }
        if talker {
            self.io.send_end_byte(1);
        }
    }

    fn require_seq_state(&mut self, required: SeqState, talker: bool) -> bool {
        if self.seq_state != required {
            self.set_seq_error(talker);
            false
        } else {
            true
        }
    }

    fn is_dsj_ok(&self) -> bool {
        self.dsj != 2
    }

    /// Make `unit_no` the current unit. False (with the matching error set)
    /// when the number is out of range or the unit is not usable.
    fn select_unit(&mut self, unit_no: u8) -> bool {
        let unit_no = usize::from(unit_no);
        if unit_no >= self.units.len() {
            self.set_error(ERROR_NO_UNIT);
            return false;
        }
        self.current_unit = unit_no;
        let unit = &self.units[unit_no];
        if unit.f_bit || !unit.is_ready() {
            self.set_error(ERROR_STAT2);
            false
        } else {
            true
        }
    }

    /// A buffered transfer is held off until the host reads status, unless
    /// the pending error is one of the benign ones
    fn dsj1_holdoff(&self) -> bool {
        self.dsj == 1 && self.stat1 != ERROR_BAD_CMD && self.stat1 != ERROR_IO
    }

    fn is_lba_ok(&mut self) -> bool {
        if self.units[self.current_unit].current_lba < self.fixed.geometry.max_lba() {
            return true;
        }
        self.set_error(ERROR_ATTENTION);
        let unit = &mut self.units[self.current_unit];
        unit.a_bit = true;
        unit.c_bit = true;
        false
    }

    fn set_error(&mut self, error_code: u8) {
        self.stat1 = error_code;
        self.failed_unit = self.current_unit;
        log::debug!("error {:02x} on unit {}", error_code, self.failed_unit);
        if self.dsj != 2 {
            self.dsj = 1;
        }
    }

    fn clear_errors(&mut self) {
        self.stat1 = 0;
        self.dsj = 0;
    }

    fn clear_dsj(&mut self) {
        if self.dsj != 2 {
            self.dsj = 0;
        }
    }

    fn amigo_clear(&mut self) {
        for unit in &mut self.units {
            unit.a_bit = false;
            unit.c_bit = false;
            unit.f_bit = false;
            unit.current_lba = 0;
        }
        self.current_unit = 0;
        self.seq_state = SeqState::Idle;
        self.clear_errors();
    }

    // ------------------------------------------------------------------------
    // Command Execution
    // ------------------------------------------------------------------------

    fn cmd_send_data(&mut self) {
        if self.require_seq_state(SeqState::WaitSendData, true) {
            self.io.send_data(&self.buffer, false);
            self.seq_state = SeqState::Idle;
        }
    }

    fn cmd_send_status(&mut self) {
        if self.require_seq_state(SeqState::WaitSendStatus, true) {
            self.io.send_data(&self.status, false);
            self.seq_state = SeqState::Idle;
        }
    }

    fn cmd_dsj(&mut self) {
        if self.require_seq_state(SeqState::Idle, true) {
            self.io.send_end_byte(self.dsj);
            // The power-up notice is delivered exactly once
            if self.dsj == 2 {
                self.dsj = 0;
            }
        }
        self.pp_enabled = false;
    }

    fn cmd_unknown_listen(&mut self) {
        self.set_error(ERROR_IO);
        self.seq_state = SeqState::Idle;
    }

    fn cmd_receive_data(&mut self, data: Vec<u8>) {
        if self.require_seq_state(SeqState::WaitReceiveData, false) {
            self.buffer = data;
            self.units[self.current_unit].write_img(&self.buffer);
            self.clear_errors();
            self.seq_state = SeqState::Idle;
        }
    }

    fn cmd_seek(&mut self, unit_no: u8, chs: Chs) {
        if self.require_seq_state(SeqState::Idle, false)
            && self.is_dsj_ok()
            && self.select_unit(unit_no)
        {
            // A seek reports back as an address-attention event
            self.set_error(ERROR_ATTENTION);
            self.units[self.current_unit].a_bit = true;
            match chs.to_lba(&self.fixed.geometry) {
                Ok(new_lba) => {
                    self.units[self.current_unit].current_lba = new_lba;
                    self.clear_dsj();
                }
                Err(_) => {
                    self.units[self.current_unit].c_bit = true;
                }
            }
        }
    }

    fn cmd_req_status(&mut self, unit_no: u8) {
        if self.require_seq_state(SeqState::Idle, false) && self.is_dsj_ok() {
            if usize::from(unit_no) < self.units.len() {
                self.current_unit = usize::from(unit_no);
                let repr = self.units[self.current_unit].to_byte_repr();
                self.status = [self.stat1, unit_no, repr[0], repr[1]];
            } else {
                // Invalid unit number
                self.status = [ERROR_NO_UNIT, unit_no, 0, 0];
            }
            let unit = &mut self.units[self.current_unit];
            unit.a_bit = false;
            unit.f_bit = false;
            unit.c_bit = false;
            self.clear_errors();
            self.seq_state = SeqState::WaitSendStatus;
        }
    }

    fn cmd_verify(&mut self, unit_no: u8, sec_count: u16) {
        if self.require_seq_state(SeqState::Idle, false)
            && self.is_dsj_ok()
            && self.select_unit(unit_no)
        {
            let max_lba = self.fixed.geometry.max_lba();
            let unit = &mut self.units[self.current_unit];
            unit.current_lba = if sec_count == 0 {
                // Verify to end of disk
                max_lba
            } else {
                max_lba.min(unit.current_lba + Lba::from(sec_count))
            };
            self.clear_errors();
        }
    }

    fn cmd_req_log_addr(&mut self) {
        if self.require_seq_state(SeqState::Idle, false) && self.is_dsj_ok() {
            let current_lba = self.units[self.current_unit].current_lba;
            match Chs::from_lba(current_lba, &self.fixed.geometry) {
                Ok(chs) => {
                    self.status = chs.to_byte_repr();
                    self.clear_errors();
                    self.seq_state = SeqState::WaitSendStatus;
                }
                Err(_) => self.set_error(ERROR_IO),
            }
        }
    }

    fn cmd_end(&mut self) {
        if self.require_seq_state(SeqState::Idle, false) && self.is_dsj_ok() {
            self.clear_errors();
            self.pp_enabled = false;
        }
    }

    fn cmd_buff_wr(&mut self, unit_no: u8) {
        if self.require_seq_state(SeqState::Idle, false)
            && self.is_dsj_ok()
            && self.select_unit(unit_no)
            && !self.dsj1_holdoff()
            && self.is_lba_ok()
        {
            self.seq_state = SeqState::WaitReceiveData;
        }
    }

    fn cmd_buff_rd(&mut self, unit_no: u8) {
        if self.require_seq_state(SeqState::Idle, false)
            && self.is_dsj_ok()
            && self.select_unit(unit_no)
            && !self.dsj1_holdoff()
            && self.is_lba_ok()
        {
            self.buffer = self.units[self.current_unit].read_img();
            self.clear_errors();
            self.seq_state = SeqState::WaitSendData;
        }
    }

    fn cmd_format(&mut self, unit_no: u8, ovr: u8, filler: u8) {
        if self.require_seq_state(SeqState::Idle, false)
            && self.is_dsj_ok()
            && self.select_unit(unit_no)
        {
            let max_lba = self.fixed.geometry.max_lba();
            let ignore_filler = self.fixed.ignore_fmt_filler;
            let unit = &mut self.units[self.current_unit];
            if !ignore_filler || (ovr & 0x80) != 0 {
                unit.format_img(if ignore_filler { 0xff } else { filler }, max_lba);
            }
            unit.current_lba = 0;
            self.clear_errors();
        }
    }

    fn cmd_amigo_clear(&mut self) {
        if self.require_seq_state(SeqState::Idle, false) {
            self.seq_state = SeqState::WaitClear;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusDecoder;
    use crate::image::MemImage;
    use crate::link::CaptureWriter;
    use crate::protocol::{Msg, MsgType};
    use std::sync::Mutex;

    type SharedImage = Arc<Mutex<MemImage>>;

    struct TestDrive {
        writer: CaptureWriter,
        decoder: BusDecoder,
        drive: DriveState,
    }

    impl TestDrive {
        fn new(model: &str, images: Vec<Option<Box<dyn BlockImage>>>) -> TestDrive {
            let writer = CaptureWriter::new();
            let link = MsgLink::new(Box::new(writer.clone()));
            let fixed = FixedData::for_model(model).unwrap();
            let drive = DriveState::new(link, fixed, images);
            TestDrive {
                writer,
                decoder: BusDecoder::new(0),
                drive,
            }
        }

        /// 9895 drive with an in-memory image on unit 0 only
        fn new_9895() -> (TestDrive, SharedImage) {
            let image: SharedImage = Arc::new(Mutex::new(MemImage::new(77 * 2 * 30)));
            let td = TestDrive::new("9895", vec![Some(Box::new(Arc::clone(&image))), None]);
            (td, image)
        }

        fn feed(&mut self, msgs: &[Msg]) {
            for &msg in msgs {
                if let Some(raw) = self.decoder.feed(msg) {
                    self.drive.exec_cmd(AmigoCmd::decode(raw));
                }
            }
        }

        fn output(&self) -> String {
            self.writer.contents()
        }

        fn clear_output(&self) {
            self.writer.clear();
        }

        /// Standard host bring-up: read the power-up DSJ, then read unit 0
        /// status to clear its F bit so transfers are accepted
        fn clear_power_up(&mut self) {
            self.feed(&talk_cmd(0x10));
            self.feed(&listen_cmd(0x0a, &[0x03, 0x00]));
            self.feed(&talk_cmd(8));
            assert_eq!(self.output(), "E:02\nP:80\nD:00\nD:00\nD:0c\nD:08\n");
            self.clear_output();
        }
    }

    fn atn_assert() -> Msg {
        Msg::new(MsgType::SignalClear, 0x01)
    }

    fn atn_release() -> Msg {
        Msg::new(MsgType::SignalSet, 0x01)
    }

    fn data(b: u8) -> Msg {
        Msg::new(MsgType::DataByte, b)
    }

    fn end(b: u8) -> Msg {
        Msg::new(MsgType::EndByte, b)
    }

    /// Addressed listen dialogue: MLA, secondary, ATN release, payload with
    /// EOI on the last byte
    fn listen_cmd(sa: u8, payload: &[u8]) -> Vec<Msg> {
        let mut msgs = vec![atn_assert(), data(0x20), data(0x60 | sa), atn_release()];
        for (i, &b) in payload.iter().enumerate() {
            if i + 1 == payload.len() {
                msgs.push(end(b));
            } else {
                msgs.push(data(b));
            }
        }
        msgs
    }

    /// Addressed talk dialogue: MTA, secondary, ATN release
    fn talk_cmd(sa: u8) -> Vec<Msg> {
        vec![atn_assert(), data(0x40), data(0x60 | sa), atn_release()]
    }

    #[test]
    fn test_identify_after_unt_msa() {
        // S1
        let (mut td, _image) = TestDrive::new_9895();
        td.feed(&[atn_assert(), data(0x5f), data(0x60), atn_release()]);
        assert_eq!(td.output(), "P:80\nD:00\nE:81\n");
    }

    #[test]
    fn test_power_up_dsj() {
        // S2
        let (mut td, _image) = TestDrive::new_9895();
        td.feed(&talk_cmd(0x10));
        td.feed(&talk_cmd(0x10));
        assert_eq!(td.output(), "E:02\nE:00\n");
        assert_eq!(td.drive.dsj, 0);
    }

    #[test]
    fn test_seek_and_req_log_addr() {
        // S3
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x02, 0x00, 0x00, 0x05, 0x01, 0x0a]));
        assert_eq!(td.drive.units[0].current_lba, 340);
        td.feed(&listen_cmd(8, &[0x14, 0x00]));
        td.feed(&talk_cmd(8));
        assert_eq!(td.output(), "D:00\nD:05\nD:01\nD:0a\n");
        assert_eq!(td.drive.seq_state, SeqState::Idle);
    }

    #[test]
    fn test_buffered_write() {
        // S4
        let (mut td, image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(9, &[0x08, 0x00]));
        assert_eq!(td.drive.seq_state, SeqState::WaitReceiveData);
        td.feed(&listen_cmd(0, &[0xaa; SECTOR_SIZE]));
        assert_eq!(image.lock().unwrap().sector(0), &[0xaa; SECTOR_SIZE]);
        assert_eq!(td.drive.units[0].current_lba, 1);
        assert_eq!(td.drive.stat1, 0);
        assert_eq!(td.drive.dsj, 0);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
    }

    #[test]
    fn test_short_receive_data_is_padded() {
        let (mut td, image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(9, &[0x08, 0x00]));
        td.feed(&listen_cmd(0, &[0x11, 0x22, 0x33]));
        let img = image.lock().unwrap();
        assert_eq!(&img.sector(0)[..3], &[0x11, 0x22, 0x33]);
        assert_eq!(&img.sector(0)[3..], &[0u8; SECTOR_SIZE - 3][..]);
    }

    #[test]
    fn test_buffered_read_before_dsj_clear() {
        // S5: dsj == 2 blocks the read; the later send-data is a
        // sequencing error answered with a single end byte of 1
        let (mut td, _image) = TestDrive::new_9895();
        td.feed(&listen_cmd(0x0a, &[0x05, 0x00]));
        assert_eq!(td.drive.seq_state, SeqState::Idle);
        assert_eq!(td.drive.stat1, 0);
        assert_eq!(td.drive.units[0].current_lba, 0);
        td.feed(&talk_cmd(0));
        assert_eq!(td.output(), "P:80\nE:01\n");
        assert_eq!(td.drive.seq_state, SeqState::Idle);
        assert_eq!(td.drive.dsj, 2);
    }

    #[test]
    fn test_seek_out_of_range() {
        // S6: cylinder 77 is right at the bound for a 9895
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x02, 0x00, 0x00, 0x4d, 0x02, 0x1e]));
        assert_eq!(td.drive.stat1, ERROR_ATTENTION);
        assert_eq!(td.drive.dsj, 1);
        assert!(td.drive.units[0].a_bit);
        assert!(td.drive.units[0].c_bit);
        assert_eq!(td.drive.units[0].current_lba, 0);
    }

    #[test]
    fn test_buffered_read_round_trip() {
        let (mut td, image) = TestDrive::new_9895();
        image.lock().unwrap().fill_sector(0, 0x5a);
        td.clear_power_up();
        td.feed(&listen_cmd(0x0a, &[0x05, 0x00]));
        assert_eq!(td.drive.seq_state, SeqState::WaitSendData);
        assert_eq!(td.drive.units[0].current_lba, 1);
        td.clear_output();
        td.feed(&talk_cmd(0));
        let mut expected = String::new();
        for _ in 0..SECTOR_SIZE {
            expected.push_str("D:5a\n");
        }
        assert_eq!(td.output(), expected);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
    }

    #[test]
    fn test_req_status_sequence() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(0x0a, &[0x03, 0x00]));
        assert_eq!(td.drive.seq_state, SeqState::WaitSendStatus);
        td.clear_output();
        td.feed(&talk_cmd(8));
        // stat1 0, unit 0, tttt << 1, F bit already cleared at bring-up
        assert_eq!(td.output(), "D:00\nD:00\nD:0c\nD:00\n");
        assert_eq!(td.drive.seq_state, SeqState::Idle);
    }

    #[test]
    fn test_req_status_clears_holdoff() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        // Out-of-range seek leaves ATTENTION pending: transfers held off
        td.feed(&listen_cmd(8, &[0x02, 0x00, 0x00, 0x4d, 0x00, 0x00]));
        td.feed(&listen_cmd(0x0a, &[0x05, 0x00]));
        assert_eq!(td.drive.seq_state, SeqState::Idle);
        assert_eq!(td.drive.units[0].current_lba, 0);
        // Status read reports the error and clears the unit bits
        td.clear_output();
        td.feed(&listen_cmd(0x0a, &[0x03, 0x00]));
        td.feed(&talk_cmd(8));
        assert_eq!(td.output(), "D:1f\nD:00\nD:8c\nD:84\n");
        assert!(!td.drive.units[0].a_bit);
        assert!(!td.drive.units[0].c_bit);
        // Transfer goes through now
        td.feed(&listen_cmd(0x0a, &[0x05, 0x00]));
        assert_eq!(td.drive.seq_state, SeqState::WaitSendData);
        assert_eq!(td.drive.units[0].current_lba, 1);
    }

    #[test]
    fn test_req_status_bad_unit() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(0x0a, &[0x03, 0x05]));
        td.feed(&talk_cmd(8));
        assert_eq!(td.output(), "D:17\nD:05\nD:00\nD:00\n");
    }

    #[test]
    fn test_status_of_not_ready_unit() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        // Unit 1 has no image: ss = 3, F clear
        td.feed(&listen_cmd(0x0a, &[0x03, 0x01]));
        td.clear_output();
        td.feed(&talk_cmd(8));
        assert_eq!(td.output(), "D:00\nD:01\nD:8c\nD:03\n");
    }

    #[test]
    fn test_select_not_ready_unit_fails() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(0x0a, &[0x05, 0x01]));
        assert_eq!(td.drive.stat1, ERROR_STAT2);
        assert_eq!(td.drive.dsj, 1);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
    }

    #[test]
    fn test_select_bad_unit_fails() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(9, &[0x08, 0x07]));
        assert_eq!(td.drive.stat1, ERROR_NO_UNIT);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
    }

    #[test]
    fn test_verify() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0x00, 0x05]));
        assert_eq!(td.drive.units[0].current_lba, 5);
        // Count 0 verifies to the end of the disk
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0x00, 0x00]));
        assert_eq!(td.drive.units[0].current_lba, 4620);
        // Capped at the end of the disk
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0xff, 0xff]));
        assert_eq!(td.drive.units[0].current_lba, 4620);
        assert_eq!(td.drive.stat1, 0);
    }

    #[test]
    fn test_req_log_addr_after_verify_to_end() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0x00, 0x00]));
        td.feed(&listen_cmd(8, &[0x14, 0x00]));
        td.clear_output();
        td.feed(&talk_cmd(8));
        // One-past-the-end address is cylinder 77
        assert_eq!(td.output(), "D:00\nD:4d\nD:00\nD:00\n");
    }

    #[test]
    fn test_transfer_at_end_of_disk_sets_attention() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0x00, 0x00]));
        td.feed(&listen_cmd(0x0a, &[0x05, 0x00]));
        assert_eq!(td.drive.stat1, ERROR_ATTENTION);
        assert!(td.drive.units[0].a_bit);
        assert!(td.drive.units[0].c_bit);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
    }

    #[test]
    fn test_format_with_filler() {
        let (mut td, image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x02, 0x00, 0x00, 0x01, 0x00, 0x00]));
        td.feed(&listen_cmd(0x0c, &[0x18, 0x00, 0x00, 0x00, 0xe5]));
        // 9895 honours the filler byte
        assert_eq!(image.lock().unwrap().sector(0), &[0xe5; SECTOR_SIZE]);
        assert_eq!(image.lock().unwrap().sector(4619), &[0xe5; SECTOR_SIZE]);
        assert_eq!(td.drive.units[0].current_lba, 0);
        assert_eq!(td.drive.stat1, 0);
    }

    #[test]
    fn test_format_filler_ignored() {
        // 9134b ignores the filler unless the override bit is set
        let image = Arc::new(Mutex::new(MemImage::new(306 * 4 * 31)));
        image.lock().unwrap().fill_sector(0, 0x77);
        let mut td = TestDrive::new("9134b", vec![Some(Box::new(Arc::clone(&image)))]);
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x02, 0x00, 0x00, 0x02, 0x00, 0x00]));
        td.feed(&listen_cmd(0x0c, &[0x18, 0x00, 0x00, 0x00, 0xe5]));
        // No fill at all, but the cursor comes back to zero
        assert_eq!(image.lock().unwrap().sector(0), &[0x77; SECTOR_SIZE]);
        assert_eq!(td.drive.units[0].current_lba, 0);
        // Override bit forces a fill, with 0xff rather than the filler
        td.feed(&listen_cmd(0x0c, &[0x18, 0x00, 0x80, 0x00, 0xe5]));
        assert_eq!(image.lock().unwrap().sector(0), &[0xff; SECTOR_SIZE]);
    }

    #[test]
    fn test_amigo_clear() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x02, 0x00, 0x00, 0x05, 0x01, 0x0a]));
        assert_eq!(td.drive.units[0].current_lba, 340);
        // Amigo clear secondary, then the selected-device-clear that
        // carries it out
        td.feed(&listen_cmd(0x10, &[0x00]));
        assert_eq!(td.drive.seq_state, SeqState::WaitClear);
        td.feed(&[atn_assert(), data(0x04), atn_release()]);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
        assert_eq!(td.drive.stat1, 0);
        assert_eq!(td.drive.dsj, 0);
        assert_eq!(td.drive.current_unit, 0);
        for unit in &td.drive.units {
            assert_eq!(unit.current_lba, 0);
            assert!(!unit.a_bit);
            assert!(!unit.c_bit);
            assert!(!unit.f_bit);
        }
    }

    #[test]
    fn test_unknown_listen_sets_io_error() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(5, &[0x01, 0x02]));
        assert_eq!(td.drive.stat1, ERROR_IO);
        assert_eq!(td.drive.dsj, 1);
        // IO errors do not hold off transfers
        td.feed(&listen_cmd(0x0a, &[0x05, 0x00]));
        assert_eq!(td.drive.seq_state, SeqState::WaitSendData);
    }

    #[test]
    fn test_unknown_talk_is_ignored() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.clear_output();
        td.feed(&talk_cmd(5));
        assert_eq!(td.drive.stat1, 0);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
    }

    #[test]
    fn test_end_yields_parallel_poll() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        // PP is high after bring-up; End yields it
        td.feed(&listen_cmd(8, &[0x15, 0x00]));
        assert_eq!(td.output(), "P:00\n");
        assert!(!td.drive.pp_enabled);
        // The next listen/talk command raises it again
        td.clear_output();
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0x00, 0x01]));
        assert_eq!(td.output(), "P:80\n");
    }

    #[test]
    fn test_pp_alternates_on_edges_only() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        // DSJ talk yields the line: falling edge
        td.feed(&talk_cmd(0x10));
        assert_eq!(td.output(), "E:00\nP:00\n");
        td.clear_output();
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0x00, 0x01]));
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0x00, 0x01]));
        td.feed(&listen_cmd(8, &[0x07, 0x00, 0x00, 0x01]));
        // Three verifies, one rising edge
        assert_eq!(td.output(), "P:80\n");
    }

    #[test]
    fn test_device_clear_during_sequence() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(9, &[0x08, 0x00]));
        assert_eq!(td.drive.seq_state, SeqState::WaitReceiveData);
        // DCL in the middle of a transfer resets the sequencing
        td.feed(&[atn_assert(), data(0x14), atn_release()]);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
        assert_eq!(td.drive.dsj, 0);
    }

    #[test]
    fn test_listen_sequencing_error_is_silent() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.clear_output();
        // Receive data without a buffered write first: listener-side
        // violation, no end byte goes out
        td.feed(&listen_cmd(0, &[0x42; 4]));
        assert_eq!(td.drive.stat1, ERROR_IO);
        assert_eq!(td.drive.seq_state, SeqState::Idle);
        assert_eq!(td.output(), "");
    }

    #[test]
    fn test_seek_to_unit_without_image() {
        let (mut td, _image) = TestDrive::new_9895();
        td.clear_power_up();
        td.feed(&listen_cmd(8, &[0x02, 0x01, 0x00, 0x00, 0x00, 0x00]));
        assert_eq!(td.drive.stat1, ERROR_STAT2);
        assert_eq!(td.drive.current_unit, 1);
    }
}
