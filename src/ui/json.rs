//! JSON line protocol for machine frontends: feedback goes out as one JSON
//! object per line on stdout, commands come in as serialized [`Status`]
//! values on stdin.

use std::io::{BufRead, BufReader};

use serde_json::json;
use tracing::error;

use super::{DebuggerUI, Status};
use crate::errors::Result;
use crate::feedback::Feedback;

pub struct JsonUI {}

impl JsonUI {
    pub fn build() -> Result<Self> {
        Ok(JsonUI {})
    }
}

impl DebuggerUI for JsonUI {
    fn process(&mut self, feedback: &Feedback) -> Result<Status> {
        println!("{}", json!({ "feedback": feedback }));

        let mut reader = BufReader::new(std::io::stdin());
        let mut buf = Vec::new();
        loop {
            buf.clear();
            reader.read_until(b'\n', &mut buf)?;
            match serde_json::from_slice(&buf) {
                Ok(status) => return Ok(status),
                Err(e) => {
                    error!("{e}");
                    continue;
                }
            }
        }
    }
}
