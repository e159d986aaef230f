//! Wire shape of one logical-clock message: a tuple of the local
//! logical clock time, the sender logical machine id, and the message
//! ID number, per `original_source/hw2/model.py`'s
//! `Message` namedtuple.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockMessage {
    pub local_time: u64,
    pub sender: usize,
    pub id: u64,
}
