// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::Transport;
use std::io::{self, BufWriter, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info};

/// An emulator running as a child process, spoken to over its stdin/stdout.
///
/// Reads block until the emulator answers; a hung emulator is only detected
/// when it exits.
pub struct ProcessTransport {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: ChildStdout,
}

impl ProcessTransport {
    pub fn spawn<S: AsRef<str>>(program: &str, args: &[S]) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args.iter().map(AsRef::as_ref))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "emulator has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "emulator has no stdout"))?;

        info!("Started emulator '{}' (pid {})", program, child.id());

        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            stdout,
        })
    }

    fn stdin(&mut self) -> io::Result<&mut BufWriter<ChildStdin>> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "emulator closed"))
    }
}

impl Transport for ProcessTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.stdin()?.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdin()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping stdin lets a well-behaved emulator exit on EOF.
        self.stdin.take();
        match self.child.try_wait()? {
            Some(status) => debug!("Emulator exited with {}", status),
            None => {
                self.child.kill()?;
                let status = self.child.wait()?;
                debug!("Emulator killed, exit {}", status);
            }
        }
        Ok(())
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.close();
        }
    }
}
