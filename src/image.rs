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

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::geometry::Lba;

/// Size of sectors
pub const SECTOR_SIZE: usize = 256;

// ============================================================================
// BlockImage Trait
// ============================================================================

/// Trait for the per-unit disk image backing store
pub trait BlockImage: Send {
    fn read_sector(&mut self, lba: Lba, buf: &mut [u8; SECTOR_SIZE]) -> std::io::Result<()>;

    fn write_sector(&mut self, lba: Lba, buf: &[u8; SECTOR_SIZE]) -> std::io::Result<()>;

    /// Fill the first `sectors` sectors of the image with `filler`
    fn format(&mut self, sectors: Lba, filler: u8) -> std::io::Result<()>;
}

// ============================================================================
// File-backed Image
// ============================================================================

/// Image kept in a regular file, one sector every SECTOR_SIZE bytes
pub struct FileImage {
    file: File,
}

impl FileImage {
    pub fn open(path: &Path) -> std::io::Result<FileImage> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(FileImage { file })
    }
}

impl BlockImage for FileImage {
    fn read_sector(&mut self, lba: Lba, buf: &mut [u8; SECTOR_SIZE]) -> std::io::Result<()> {
        self.file
            .seek(SeekFrom::Start(u64::from(lba) * SECTOR_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_sector(&mut self, lba: Lba, buf: &[u8; SECTOR_SIZE]) -> std::io::Result<()> {
        self.file
            .seek(SeekFrom::Start(u64::from(lba) * SECTOR_SIZE as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn format(&mut self, sectors: Lba, filler: u8) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let sector = [filler; SECTOR_SIZE];
        for _ in 0..sectors {
            self.file.write_all(&sector)?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory Image for Testing
// ============================================================================

#[cfg(test)]
pub struct MemImage {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

#[cfg(test)]
impl MemImage {
    pub fn new(sectors: Lba) -> MemImage {
        MemImage {
            sectors: vec![[0u8; SECTOR_SIZE]; sectors as usize],
        }
    }

    pub fn sector(&self, lba: Lba) -> &[u8; SECTOR_SIZE] {
        &self.sectors[lba as usize]
    }

    pub fn fill_sector(&mut self, lba: Lba, value: u8) {
        self.sectors[lba as usize] = [value; SECTOR_SIZE];
    }
}

#[cfg(test)]
impl BlockImage for MemImage {
    fn read_sector(&mut self, lba: Lba, buf: &mut [u8; SECTOR_SIZE]) -> std::io::Result<()> {
        *buf = self.sectors[lba as usize];
        Ok(())
    }

    fn write_sector(&mut self, lba: Lba, buf: &[u8; SECTOR_SIZE]) -> std::io::Result<()> {
        self.sectors[lba as usize] = *buf;
        Ok(())
    }

    fn format(&mut self, sectors: Lba, filler: u8) -> std::io::Result<()> {
        for lba in 0..sectors.min(self.sectors.len() as Lba) {
            self.sectors[lba as usize] = [filler; SECTOR_SIZE];
        }
        Ok(())
    }
}

// Lets a test keep a handle on an image after handing it to a drive
#[cfg(test)]
impl BlockImage for std::sync::Arc<std::sync::Mutex<MemImage>> {
    fn read_sector(&mut self, lba: Lba, buf: &mut [u8; SECTOR_SIZE]) -> std::io::Result<()> {
        self.lock().unwrap().read_sector(lba, buf)
    }

    fn write_sector(&mut self, lba: Lba, buf: &[u8; SECTOR_SIZE]) -> std::io::Result<()> {
        self.lock().unwrap().write_sector(lba, buf)
    }

    fn format(&mut self, sectors: Lba, filler: u8) -> std::io::Result<()> {
        self.lock().unwrap().format(sectors, filler)
    }
}
