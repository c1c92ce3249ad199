pub mod pairing;
pub mod realtime;
pub mod server;
pub mod storage;
pub mod sync;
