//! Simple RFB server example.
//!
//! Creates a server with a static test-pattern framebuffer.
//!
//! Usage:
//!   cargo run --example simple_server
//!
//! Then connect with a VNC viewer to localhost:5900

use std::error::Error;
use std::net::SocketAddr;
use tinyrfb::framebuffer::Color;
use tinyrfb::Server;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    println!("Starting RFB server on port 5900...");
    println!("Connect with: vncviewer localhost:5900");

    let server = Server::new(800, 600, 4)?;
    server.bind("0.0.0.0:5900".parse::<SocketAddr>().unwrap())?;

    {
        let mut fb = server.lock_fb_write();
        for y in 0..fb.height() {
            for x in 0..fb.width() {
                let r = (x * 255 / fb.width()) as u8;
                let g = (y * 255 / fb.height()) as u8;
                fb.set_pixel(x, y, Color { r, g, b: 128 });
            }
        }
    }
    println!("Framebuffer filled with test pattern");

    server.start()?;
    println!("Server ready for connections, press Ctrl+C to stop");

    loop {
        if let Some(event) = server.poll_event() {
            println!("{event:?}");
        } else {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
    }
}
