//! I/O devices for the virtual machine. A device answers the
//! machine's input suspensions and absorbs its output suspensions;
//! [`crate::vm::Machine::run`] polls the machine and services each
//! suspension through the device between resumptions.

use std::collections::VecDeque;
use std::io::{stdin, stdout, Read, Write};

/// An input/output device for the machine to exchange words with.
/// `get` supplies one word of input, `put` consumes one word of
/// output.
pub trait Device {
    fn get(&mut self) -> Result<i64, String>;
    fn put(&mut self, value: i64) -> Result<(), String>;
}

/// Byte-oriented standard input and output. Each input word is one
/// byte of stdin (`-1` at end of input); each output word is written
/// to stdout as a single byte, truncated.
pub struct StandardDevice;

impl Device for StandardDevice {
    fn get(&mut self) -> Result<i64, String> {
        // Flush any pending output so prompts appear before the read.
        if stdout().flush().is_err() {
            return Err(String::from("could not flush output"));
        }
        let mut byte = [0u8];
        match stdin().lock().read(&mut byte) {
            Ok(0) => Ok(-1),
            Ok(_) => Ok(i64::from(byte[0])),
            Err(_) => Err(String::from("could not read input")),
        }
    }

    fn put(&mut self, value: i64) -> Result<(), String> {
        stdout()
            .lock()
            .write_all(&[value as u8])
            .map_err(|_| String::from("could not write output"))
    }
}

/// A device used for testing. It replays a buffer of scripted input
/// and records every output word; tests run a program and then check
/// the recorded output against the expected output.
#[derive(Default)]
pub struct TestingDevice {
    pub input: VecDeque<i64>,
    pub output: Vec<i64>,
}

impl TestingDevice {
    /// A device whose input is the bytes of the given text.
    pub fn new(input: impl ToString) -> Self {
        TestingDevice {
            input: input.to_string().chars().map(|c| c as i64).collect(),
            output: Vec::new(),
        }
    }

    /// A device with scripted input words.
    pub fn with_words(input: Vec<i64>) -> Self {
        TestingDevice {
            input: input.into(),
            output: Vec::new(),
        }
    }

    /// The recorded output interpreted as bytes of text.
    pub fn output_str(&self) -> String {
        self.output.iter().map(|value| *value as u8 as char).collect()
    }
}

impl Device for TestingDevice {
    fn get(&mut self) -> Result<i64, String> {
        self.input
            .pop_front()
            .ok_or_else(|| String::from("ran out of input"))
    }

    fn put(&mut self, value: i64) -> Result<(), String> {
        self.output.push(value);
        Ok(())
    }
}
