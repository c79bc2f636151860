//! Attaching a preconfigured listener instead of letting the server bind its own.
//!
//! Demonstrates the host-owns-the-socket path: useful when a supervising process
//! hands the server an already-bound, already-listening socket (for example one
//! inherited across a restart, or configured with options `Server::bind` doesn't
//! expose).
//!
//! Usage:
//!   cargo run --example from_socket_demo

use std::error::Error;
use std::net::TcpListener;
use tinyrfb::framebuffer::Color;
use tinyrfb::Server;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let listener = TcpListener::bind("0.0.0.0:5900")?;
    println!("Listening on {}", listener.local_addr()?);

    let server = Server::new(320, 240, 2)?;
    server.attach_listener(listener);

    {
        let mut fb = server.lock_fb_write();
        for y in 0..fb.height() {
            for x in 0..fb.width() {
                fb.set_pixel(x, y, Color { r: 0, g: 160, b: 200 });
            }
        }
    }

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
