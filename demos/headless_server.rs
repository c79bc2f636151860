//! Headless RFB server example with animated content.
//!
//! Continuously repaints the framebuffer with an animated gradient, demonstrating
//! use in an environment with no real screen to capture.
//!
//! Usage:
//!   cargo run --example headless_server

use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tinyrfb::framebuffer::Color;
use tinyrfb::Server;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("Starting headless RFB server on port 5900...");
    println!("Connect with: vncviewer localhost:5900");

    let server = Server::new(WIDTH, HEIGHT, 4)?;
    server.bind("0.0.0.0:5900".parse::<SocketAddr>().unwrap())?;
    server.start()?;

    println!("Server started, generating animated content. Press Ctrl+C to stop.");

    let mut frame: u32 = 0;
    loop {
        {
            let mut fb = server.lock_fb_write();
            for y in 0..HEIGHT {
                for x in 0..WIDTH {
                    let r = ((x + frame) % 256) as u8;
                    let g = ((y + frame) % 256) as u8;
                    let b = ((frame / 2) % 256) as u8;
                    fb.set_pixel(x, y, Color { r, g, b });
                }
            }
        } // guard drop advances the updated counter

        while let Some(event) = server.poll_event() {
            println!("{event:?}");
        }

        frame = frame.wrapping_add(1);
        std::thread::sleep(Duration::from_millis(33)); // ~30 FPS

        if frame % 300 == 0 {
            println!("frame {frame}");
        }
    }
}
