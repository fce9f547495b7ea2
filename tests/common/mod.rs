//! Virtual-time serial line for exercising the receiver and client without
//! hardware or real delays.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use modbus_rtu_master::SerialTransport;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct MockTransport {
    origin: Instant,
    now: Instant,
    /// Bytes the "slave" has already put on the line.
    inbound: VecDeque<u8>,
    /// Bytes that arrive once virtual time reaches their instant.
    scheduled: VecDeque<(Instant, u8)>,
    /// Replies released one per write.
    replies: VecDeque<Vec<u8>>,
    loopback: bool,
    pub written: Vec<Vec<u8>>,
    pub clears: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        let origin = Instant::now();
        MockTransport {
            origin,
            now: origin,
            inbound: VecDeque::new(),
            scheduled: VecDeque::new(),
            replies: VecDeque::new(),
            loopback: false,
            written: Vec::new(),
            clears: 0,
        }
    }

    /// Every written frame comes straight back, as a write echo would.
    pub fn loopback() -> Self {
        MockTransport {
            loopback: true,
            ..MockTransport::new()
        }
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        self.now.duration_since(self.origin)
    }

    /// Bytes available right away.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// All of `bytes` arrive together `at` after creation.
    pub fn schedule(&mut self, at: Duration, bytes: &[u8]) {
        for &byte in bytes {
            self.scheduled.push_back((self.origin + at, byte));
        }
    }

    /// One byte every `gap`, the first at `start`.
    pub fn schedule_spaced(&mut self, start: Duration, gap: Duration, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            self.scheduled
                .push_back((self.origin + start + gap * i as u32, byte));
        }
    }

    /// Reply put on the line by the next write.
    pub fn reply_with(&mut self, bytes: &[u8]) {
        self.replies.push_back(bytes.to_vec());
    }

    pub fn pending(&self) -> usize {
        self.inbound.len() + self.scheduled.len()
    }

    fn deliver(&mut self) {
        while let Some(&(at, byte)) = self.scheduled.front() {
            if at > self.now {
                break;
            }
            self.inbound.push_back(byte);
            self.scheduled.pop_front();
        }
    }
}

impl SerialTransport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.written.push(bytes.to_vec());
        if self.loopback {
            self.inbound.extend(bytes);
        } else if let Some(reply) = self.replies.pop_front() {
            self.inbound.extend(reply);
        }
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.deliver();
        Ok(self.inbound.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.deliver();
        let mut count = 0;
        while count < buf.len() {
            match self.inbound.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn now(&self) -> Instant {
        self.now
    }

    fn pause(&mut self, duration: Duration) {
        self.now += duration;
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.clears += 1;
        self.deliver();
        self.inbound.clear();
        Ok(())
    }
}

/// A transport whose every call fails, for error-path tests.
pub struct BrokenTransport;

impl SerialTransport for BrokenTransport {
    fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "line down"))
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "line down"))
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "line down"))
    }

    fn pause(&mut self, _duration: Duration) {}
}
