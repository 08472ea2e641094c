//! Example that runs on Linux using a serial-USB-adapter.
use std::{
    env,
    io::{self, Read, Write},
    thread,
    time::Duration,
};

use esp_at_host::{
    config::Config,
    event::{callback, Event, Flow},
    netconn::Netconn,
    types::ConnType,
    Esp, Link,
};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Transmit half of the serial port
struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl Link for SerialLink {
    fn send(&mut self, data: &[u8]) -> usize {
        match self.port.write_all(data) {
            Ok(()) => data.len(),
            Err(e) => {
                log::error!("Serial write failed: {}", e);
                0
            }
        }
    }

    fn set_baudrate(&mut self, baudrate: u32) {
        if let Err(e) = self.port.set_baud_rate(baudrate) {
            log::error!("Changing baudrate failed: {}", e);
        }
    }
}

fn main() {
    env_logger::init();

    // Parse args
    let args: Vec<String> = env::args().collect();
    if args.len() != 5 {
        println!("Usage: {} <path-to-serial> <baudrate> <ssid> <psk>", args[0]);
        println!("Example: {} /dev/ttyUSB0 115200 mywifi hellopasswd123", args[0]);
        println!("\nNote: To run the example with debug logging, run it like this:");
        println!("\n  RUST_LOG=trace cargo run --example linux -- /dev/ttyUSB0 115200 mywifi hellopasswd123");
        std::process::exit(1);
    }
    let dev = &args[1];
    let baud_rate: u32 = args[2].parse().unwrap();
    let ssid = &args[3];
    let psk = &args[4];

    println!("Starting (dev={}, baud={:?})...", dev, baud_rate);

    // Open serial port
    let serial_tx = serialport::new(dev, baud_rate)
        .data_bits(DataBits::Eight)
        .flow_control(FlowControl::None)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(Duration::from_millis(500))
        .open()
        .expect("Could not open serial port");
    let mut serial_rx = serial_tx.try_clone().expect("Could not clone serial port");

    // Flush serial RX buffer, to ensure that there isn't any remaining left
    // form previous sessions.
    flush_serial(&mut serial_rx);

    // Engine without reset, the reader thread has to run first
    let config = Config::default().reset_on_init(false);
    let esp = Esp::init(config, SerialLink { port: serial_tx }, true).expect("Could not start engine");

    esp.register_callback(callback(|event: &Event| {
        match event {
            Event::WifiGotIp => println!("Got IP"),
            Event::WifiDisconnected => println!("WiFi disconnected"),
            Event::Reset { forced: false } => println!("Device restarted unexpectedly"),
            _ => {}
        }
        Flow::Continue
    }));

    // Launch reading thread, to pass incoming data from serial to the engine
    let reader = esp.clone();
    thread::Builder::new()
        .name("serial_read".to_string())
        .spawn(move || loop {
            let mut buffer = [0; 64];
            match serial_rx.read(&mut buffer[..]) {
                Ok(0) => {}
                Ok(bytes_read) => {
                    reader.input(&buffer[..bytes_read]);
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                        // Ignore
                    }
                    _ => {
                        log::error!("Serial reading thread error while reading: {}", e);
                    }
                },
            }
        })
        .unwrap();

    println!("Resetting device...");
    esp.reset(true).expect("Reset failed");
    println!("AT version {:?}", esp.version_at());

    // Join WIFI access point
    println!("Join WiFi \"{}\"...", ssid);
    esp.sta_join(ssid, psk, None, true).expect("Could not join access point");
    println!("Station address: {:?}", esp.sta_ip());

    let remote_host = "ifconfig.net";
    let ip = esp
        .dns_gethostbyname(remote_host, true)
        .expect("Could not resolve host")
        .unwrap();
    println!("{} resolved to {}", remote_host, ip);

    // Create TCP connection
    let socket = Netconn::new(&esp, ConnType::Tcp).expect("Failed to create netconn");
    println!("Connecting to {}...", remote_host);
    socket
        .connect(remote_host, 80)
        .unwrap_or_else(|e| panic!("Failed to connect to {}: {:?}", remote_host, e));
    println!("Connected!");

    // Send HTTP request
    println!("Sending HTTP request...");
    let request = b"GET / HTTP/1.1\r\nAccept: text/plain\r\nHost: ifconfig.net\r\nConnection: close\r\n\r\n";
    socket.write(request).expect("Could not buffer HTTP request");
    socket.flush().expect("Could not send HTTP request");

    // Read response until the server closes
    let mut response = Vec::new();
    while let Ok(pbuf) = socket.receive() {
        response.extend(pbuf.to_vec());
    }
    println!("Read {} bytes", response.len());
    let response = String::from_utf8_lossy(&response);

    // Very primitive HTTP response parsing
    let (headers, body) = response.split_once("\r\n\r\n").unwrap_or_else(|| {
        println!("Response:\n---\n{}\n---", response);
        panic!("Could not parse HTTP response");
    });
    if !headers.starts_with("HTTP/1.1 200 ") {
        panic!("Bad HTTP response, found {}", headers.lines().next().unwrap_or_default());
    }
    println!("Your public IP, as returned by {}: {}", remote_host, body.trim());

    let _ = socket.close();
    socket.delete();
}

/// Flush the serial port receive buffer.
fn flush_serial(serial_rx: &mut Box<dyn SerialPort>) {
    let mut buf = [0; 32];
    loop {
        match serial_rx.read(&mut buf[..]) {
            Ok(0) => break,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => break,
            Ok(_) => continue,
            Err(e) => panic!("Error while flushing serial: {}", e),
        }
    }
}
