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

// High-level emulator of HP Amigo disk drives, speaking the IEEE-488 bus
// through a remotizer peer over TCP
mod amigo;
mod bus;
mod drive;
mod geometry;
mod image;
mod link;
mod protocol;

use clap::Parser;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use amigo::AmigoCmd;
use bus::BusDecoder;
use drive::{DriveState, FixedData};
use image::{BlockImage, FileImage};
use link::{LinkError, MsgLink};

#[derive(Parser)]
#[command(name = "amigo-drive")]
#[command(about = "Emulation of HP Amigo disk drives for the IEEE-488 remotizer", long_about = None)]
struct Cli {
    /// TCP port the remotizer peer connects to
    #[arg(short, long, default_value = "1234")]
    port: u16,

    /// Drive model to emulate
    model: String,

    /// Image file(s), one per unit in order; a unit without an image
    /// comes up not ready
    img_file: Vec<PathBuf>,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let fixed = match FixedData::for_model(&cli.model) {
        Some(fixed) => fixed,
        None => {
            eprintln!("Model {} not found", cli.model);
            eprintln!("\nAvailable models:");
            for name in FixedData::MODEL_NAMES {
                eprintln!("{}", name);
            }
            std::process::exit(1);
        }
    };

    let mut images: Vec<Option<Box<dyn BlockImage>>> = Vec::new();
    for unit in 0..fixed.units {
        match cli.img_file.get(unit) {
            Some(path) => {
                println!("Opening image file {} for unit #{}..", path.display(), unit);
                match FileImage::open(path) {
                    Ok(img) => images.push(Some(Box::new(img))),
                    Err(e) => {
                        eprintln!("Can't open {}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                }
            }
            None => {
                println!("No image for unit #{}", unit);
                images.push(None);
            }
        }
    }

    if let Err(e) = run(cli.port, fixed, images) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(
    port: u16,
    fixed: FixedData,
    images: Vec<Option<Box<dyn BlockImage>>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    println!("Listening on port {}...", port);

    let (stream, peer) = listener.accept()?;
    // One peer per run
    drop(listener);
    println!("Connected from {}", peer);
    stream.set_nodelay(true)?;

    let reader = stream.try_clone()?;
    let link = MsgLink::new(Box::new(stream));
    let receiver = Arc::clone(&link).start_receiver(Box::new(reader));

    let mut decoder = BusDecoder::new(0);
    let mut drive = DriveState::new(Arc::clone(&link), fixed, images);

    loop {
        match link.get_msg() {
            Ok(msg) => {
                log::trace!("{}", msg);
                if let Some(raw) = decoder.feed(msg) {
                    log::debug!("{}", raw);
                    let cmd = AmigoCmd::decode(raw);
                    log::info!("{}", cmd);
                    drive.exec_cmd(cmd);
                }
            }
            Err(LinkError::ConnectionClosed) => break,
        }
    }

    println!("Disconnected!");
    let _ = receiver.join();
    Ok(())
}
