use crate::config::Config;
use crate::conn::Conn;
use crate::esp::{Esp, Link};
use crate::event::{callback, Event, EventFn, EventKind, Flow};
use crate::types::ConnType;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use crossbeam_channel::{unbounded, Receiver, Sender};
use mockall::mock;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Max. time tests wait for an expected event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Link forwarding every write of the engine to a channel
pub struct ChannelLink {
    tx: Sender<Vec<u8>>,
}

impl ChannelLink {
    /// Returns the link and the receiving end of the written data
    pub fn new() -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl Link for ChannelLink {
    fn send(&mut self, data: &[u8]) -> usize {
        let _ = self.tx.send(data.to_vec());
        data.len()
    }
}

mock! {
    pub Link {}

    impl Link for Link {
        fn send(&mut self, data: &[u8]) -> usize;
        fn set_baudrate(&mut self, baudrate: u32);
    }
}

/// Simulated device running on its own thread. Every write of the engine is passed to a responder,
/// whose answers are fed back through [Esp::input].
pub struct MockDevice {
    pub esp: Esp,

    /// Writes received from the engine
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockDevice {
    /// Starts the engine threads and the device with the given responder
    pub fn start<R>(config: Config, responder: R) -> Self
    where
        R: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        let (link, rx) = ChannelLink::new();
        Self::start_with(config, link, rx, responder)
    }

    /// Same as [Self::start] for a custom link, which forwards its writes to `rx`
    pub fn start_with<R>(config: Config, link: impl Link + 'static, rx: Receiver<Vec<u8>>, mut responder: R) -> Self
    where
        R: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        let esp = Esp::init(config.reset_on_init(false), link, true).unwrap();
        let written = Arc::new(Mutex::new(Vec::new()));

        let shared = Arc::downgrade(&esp.shared);
        let log = written.clone();
        thread::spawn(move || {
            while let Ok(data) = rx.recv() {
                log.lock().unwrap().push(data.clone());
                let answers = responder(&data);

                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let esp = Esp { shared };
                for answer in answers {
                    esp.input(&answer);
                }
            }
        });

        Self { esp, written }
    }

    /// Returns a copy of the written data
    pub fn written(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|data| String::from_utf8_lossy(data).into_owned())
            .collect()
    }

    /// Number of writes starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.written().iter().filter(|data| data.starts_with(prefix)).count()
    }

    /// Receives all global events
    pub fn events(&self) -> Receiver<Event> {
        let (cb, rx) = recorder(Flow::Continue);
        self.esp.register_callback(cb);
        rx
    }

    /// Pretends the station got an IP address
    pub fn set_got_ip(&self) {
        self.esp.with_core(|core| core.status.got_ip = true);
    }

    /// Starts a blocking TCP connection to 192.168.1.2:80
    pub fn connect(&self, cb: EventFn) -> Conn {
        self.esp
            .conn_start(ConnType::Tcp, "192.168.1.2", 80, None, cb, true)
            .unwrap()
            .unwrap()
    }
}

/// Callback recording every event, returns `flow` for received data
pub fn recorder(flow: Flow) -> (EventFn, Receiver<Event>) {
    let (tx, rx) = unbounded();
    let cb = callback(move |event: &Event| {
        let _ = tx.send(event.clone());
        match event {
            Event::ConnRecv { .. } => flow,
            _ => Flow::Continue,
        }
    });
    (cb, rx)
}

/// Waits for the next event of the given kind, skipping others
pub fn wait_for(events: &Receiver<Event>, kind: EventKind) -> Event {
    loop {
        let event = events
            .recv_timeout(EVENT_TIMEOUT)
            .unwrap_or_else(|_| panic!("No {:?} event received", kind));

        if event.kind() == kind {
            return event;
        }
    }
}

/// Kinds of all events received so far
pub fn kinds(events: &Receiver<Event>) -> Vec<EventKind> {
    events.try_iter().map(|event| event.kind()).collect()
}

/// Takes everything written to a [ChannelLink] so far
pub fn take_written(rx: &Receiver<Vec<u8>>) -> Vec<String> {
    rx.try_iter().map(|data| String::from_utf8_lossy(&data).into_owned()).collect()
}

pub fn lines(answers: &[&str]) -> Vec<Vec<u8>> {
    answers.iter().map(|answer| answer.as_bytes().to_vec()).collect()
}

/// Connection number of commands like `AT+CIPSEND=<num>,...`
pub fn link_id(data: &[u8]) -> usize {
    data.iter()
        .skip_while(|c| **c != b'=')
        .skip(1)
        .take_while(|c| c.is_ascii_digit())
        .fold(0, |value, c| value * 10 + (c - b'0') as usize)
}

/// Answers of a well behaving device
pub fn answer(data: &[u8]) -> Vec<Vec<u8>> {
    if data.starts_with(b"AT+RST") || data.starts_with(b"AT+RESTORE") {
        return lines(&["OK\r\n", "\r\nready\r\n"]);
    }

    if data.starts_with(b"AT+GMR") {
        return lines(&["AT version:1.6.2.0(Apr 13 2018 11:10:59)\r\nSDK version:2.2.1(6ab97e9)\r\nOK\r\n"]);
    }

    if data.starts_with(b"AT+CIPSTATUS") {
        return lines(&["STATUS:2\r\n\r\nOK\r\n"]);
    }

    if data.starts_with(b"AT+CIPSTART") {
        let num = link_id(data);
        return vec![format!(
            "{},CONNECT\r\n+LINK_CONN:0,{},\"TCP\",0,\"192.168.1.2\",80,50000\r\n\r\nOK\r\n",
            num, num
        )
        .into_bytes()];
    }

    if data.starts_with(b"AT+CIPCLOSE") {
        return vec![format!("{},CLOSED\r\n\r\nOK\r\n", link_id(data)).into_bytes()];
    }

    if data.starts_with(b"AT+CIPSEND") {
        return lines(&["\r\nOK\r\n> "]);
    }

    if data.starts_with(b"AT+CIPSTAMAC?") {
        return lines(&["+CIPSTAMAC:\"18:fe:34:00:00:01\"\r\n\r\nOK\r\n"]);
    }

    if data.starts_with(b"AT+CIPSTA?") {
        return lines(&[
            "+CIPSTA:ip:\"192.168.1.10\"\r\n+CIPSTA:gateway:\"192.168.1.1\"\r\n+CIPSTA:netmask:\"255.255.255.0\"\r\n\r\nOK\r\n",
        ]);
    }

    if data.starts_with(b"AT") {
        return lines(&["\r\nOK\r\n"]);
    }

    // Payload after the send prompt
    vec![format!("\r\nRecv {} bytes\r\n\r\nSEND OK\r\n", data.len()).into_bytes()]
}
