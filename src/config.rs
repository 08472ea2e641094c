//! Runtime configuration of the engine
//!
//! All values have defaults matching a typical ESP8266 AT firmware. Setters may be chained:
//!
//! ````
//! use esp_at_host::config::{Config, InputMode, WifiMode};
//!
//! let config = Config::default()
//!     .max_conns(3)
//!     .wifi_mode(WifiMode::StationAccessPoint)
//!     .input_mode(InputMode::Direct);
//!
//! assert_eq!(3, config.max_conns);
//! ````
use embassy_time::Duration;

/// WiFi mode of the device, used by the reset sequence and `AT+CWMODE`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WifiMode {
    /// Station only
    Station,

    /// Soft access point only
    AccessPoint,

    /// Station and soft access point
    StationAccessPoint,
}

impl WifiMode {
    /// Value of `AT+CWMODE=<mode>`
    pub(crate) fn code(self) -> u8 {
        match self {
            WifiMode::Station => 1,
            WifiMode::AccessPoint => 2,
            WifiMode::StationAccessPoint => 3,
        }
    }

    pub(crate) fn has_station(self) -> bool {
        self != WifiMode::AccessPoint
    }

    pub(crate) fn has_access_point(self) -> bool {
        self != WifiMode::Station
    }
}

/// How received bytes reach the decoder
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Bytes are copied into a ring buffer of the given size and decoded by the processor thread
    Buffered(usize),

    /// Bytes are decoded on the caller's thread
    Direct,
}

/// Engine configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of connection slots, firmware supports up to 5
    pub max_conns: usize,

    /// Max. payload of a single `AT+CIPSEND`
    pub conn_max_data_len: usize,

    /// Attempts per payload chunk before a send is reported as failed
    pub max_send_retries: usize,

    /// Max. size of one received payload buffer
    pub ipd_max_buff_size: usize,

    /// Interval of connection poll events
    pub conn_poll_interval: Duration,

    /// Capacity of the producer mailbox
    pub producer_mbox_size: usize,

    /// Capacity of the processor mailbox
    pub processor_mbox_size: usize,

    /// Input mode, see [InputMode]
    pub input_mode: InputMode,

    /// Keeps command echo enabled (`ATE1`) during reset
    pub at_echo: bool,

    /// WiFi mode configured by the reset sequence
    pub wifi_mode: WifiMode,

    /// Capacity of the netconn accept queue
    pub netconn_accept_queue_len: usize,

    /// Capacity of the netconn receive queue
    pub netconn_receive_queue_len: usize,

    /// Resets the device when the engine is started
    pub reset_on_init: bool,

    /// Delay before the reset command is sent
    pub reset_delay: Duration,

    /// Default time a blocking command may take on the wire
    pub command_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_conns: 5,
            conn_max_data_len: 2048,
            max_send_retries: 3,
            ipd_max_buff_size: 1460,
            conn_poll_interval: Duration::from_millis(500),
            producer_mbox_size: 16,
            processor_mbox_size: 16,
            input_mode: InputMode::Buffered(4096),
            at_echo: false,
            wifi_mode: WifiMode::Station,
            netconn_accept_queue_len: 5,
            netconn_receive_queue_len: 8,
            reset_on_init: true,
            reset_delay: Duration::from_millis(0),
            command_timeout: Duration::from_millis(10_000),
        }
    }
}

impl Config {
    /// Sets the number of connection slots
    pub fn max_conns(mut self, max_conns: usize) -> Self {
        self.max_conns = max_conns;
        self
    }

    /// Sets the max. payload of one `AT+CIPSEND`
    pub fn conn_max_data_len(mut self, len: usize) -> Self {
        self.conn_max_data_len = len;
        self
    }

    /// Sets the number of send attempts per chunk
    pub fn max_send_retries(mut self, retries: usize) -> Self {
        self.max_send_retries = retries;
        self
    }

    /// Sets the max. size of one received payload buffer
    pub fn ipd_max_buff_size(mut self, size: usize) -> Self {
        self.ipd_max_buff_size = size;
        self
    }

    /// Sets the connection poll interval
    pub fn conn_poll_interval(mut self, interval: Duration) -> Self {
        self.conn_poll_interval = interval;
        self
    }

    pub fn input_mode(mut self, mode: InputMode) -> Self {
        self.input_mode = mode;
        self
    }

    pub fn at_echo(mut self, echo: bool) -> Self {
        self.at_echo = echo;
        self
    }

    pub fn wifi_mode(mut self, mode: WifiMode) -> Self {
        self.wifi_mode = mode;
        self
    }

    /// Disables or enables the reset issued by [crate::Esp::init]
    pub fn reset_on_init(mut self, reset: bool) -> Self {
        self.reset_on_init = reset;
        self
    }

    pub fn reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    /// Sets the default time a blocking command may take
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the capacity of netconn accept and receive queues
    pub fn netconn_queues(mut self, accept: usize, receive: usize) -> Self {
        self.netconn_accept_queue_len = accept;
        self.netconn_receive_queue_len = receive;
        self
    }
}
