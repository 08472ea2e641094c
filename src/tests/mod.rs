mod buff;
mod conn;
pub mod mock;
mod netconn;
mod pbuf;
mod timeout;
mod urc;
