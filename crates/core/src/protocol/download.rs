// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Chunked peripheral download handshake.

use super::{Codec, MAX_PACKET_LENGTH};
use crate::error::ProtocolResult;
use crate::transport::Transport;
use crate::Progress;
use tracing::debug;

/// Cursor over one peripheral download. Each [`step`](Self::step) performs
/// one exchange: the header together with the first packet, then one packet
/// per call.
#[derive(Debug)]
pub struct DownloadState {
    num: u8,
    data: Vec<u8>,
    packet_length: usize,
    sent: usize,
    header_sent: bool,
    finished: bool,
}

impl DownloadState {
    pub fn new(num: u8, data: Vec<u8>, packet_length: usize) -> Self {
        Self {
            num,
            data,
            packet_length: packet_length.clamp(1, MAX_PACKET_LENGTH),
            sent: 0,
            header_sent: false,
            finished: false,
        }
    }

    pub fn total(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stop without sending anything further.
    pub fn abandon(&mut self) {
        self.finished = true;
    }

    /// `None` once every packet has been acknowledged or after the first error.
    pub fn step<T: Transport>(
        &mut self,
        codec: &mut Codec<T>,
    ) -> Option<ProtocolResult<Progress>> {
        if self.finished {
            return None;
        }
        match self.advance(codec) {
            Ok(Some(progress)) => Some(Ok(progress)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    fn advance<T: Transport>(&mut self, codec: &mut Codec<T>) -> ProtocolResult<Option<Progress>> {
        if !self.header_sent {
            debug!(
                "Peripheral {}: downloading {} bytes",
                self.num,
                self.data.len()
            );
            codec.periph_download_header(self.num, self.data.len() as u32)?;
            self.header_sent = true;
        }

        if self.sent >= self.data.len() {
            return Ok(None);
        }

        let end = (self.sent + self.packet_length).min(self.data.len());
        codec.periph_download_packet(self.num, &self.data[self.sent..end])?;
        self.sent = end;

        Ok(Some(Progress {
            completed: end as u64,
            total: self.total(),
        }))
    }
}

/// Lazy download over a borrowed codec. Dropping it mid-way abandons the
/// transfer without telling the device.
pub struct PeripheralDownload<'a, T> {
    codec: &'a mut Codec<T>,
    state: DownloadState,
}

impl<'a, T: Transport> PeripheralDownload<'a, T> {
    pub(crate) fn new(codec: &'a mut Codec<T>, state: DownloadState) -> Self {
        Self { codec, state }
    }

    pub fn total(&self) -> u64 {
        self.state.total()
    }
}

impl<T: Transport> Iterator for PeripheralDownload<'_, T> {
    type Item = ProtocolResult<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        self.state.step(self.codec)
    }
}

impl<T: Transport> std::iter::FusedIterator for PeripheralDownload<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::protocol::{CMD_PERIPH_DOWNLOAD_HEADER, CMD_PERIPH_DOWNLOAD_PACKET};
    use crate::transport::scripted::ScriptedTransport;

    /// Split recorded writes into (opcode, payload length) per packet.
    fn packets(written: &[u8]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < written.len() {
            match written[i] {
                CMD_PERIPH_DOWNLOAD_HEADER => i += 6,
                CMD_PERIPH_DOWNLOAD_PACKET => {
                    let len = match written[i + 2] {
                        0 => 256,
                        n => usize::from(n),
                    };
                    out.push(len);
                    i += 3 + len;
                }
                other => panic!("unexpected opcode {:#x}", other),
            }
        }
        out
    }

    #[test]
    fn test_download_600_bytes() {
        let t = ScriptedTransport::new(b"AAAA");
        let mut codec = Codec::new(t.clone());
        let progress: Vec<Progress> = codec
            .periph_download(3, vec![0x5A; 600], 256)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(
            progress,
            vec![
                Progress { completed: 256, total: 600 },
                Progress { completed: 512, total: 600 },
                Progress { completed: 600, total: 600 },
            ]
        );
        assert_eq!(packets(&t.written()), vec![256, 256, 88]);
        let w = t.written();
        assert_eq!(u32::from_le_bytes([w[2], w[3], w[4], w[5]]), 600);
    }

    #[test]
    fn test_nack_stops_download() {
        let t = ScriptedTransport::new(b"AAN");
        let mut codec = Codec::new(t.clone());
        let mut download = codec.periph_download(0, vec![0; 600], 256);

        assert!(download.next().unwrap().is_ok());
        assert!(matches!(
            download.next(),
            Some(Err(ProtocolError::PeripheralDownload(_)))
        ));
        assert!(download.next().is_none());
        drop(download);

        assert_eq!(packets(&t.written()), vec![256, 256]);
    }

    #[test]
    fn test_header_nack() {
        let t = ScriptedTransport::new(b"N");
        let mut codec = Codec::new(t.clone());
        let results: Vec<_> = codec.periph_download(0, vec![1, 2, 3], 256).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
        assert!(packets(&t.written()).is_empty());
    }

    #[test]
    fn test_lazy_until_advanced() {
        let t = ScriptedTransport::new(b"AA");
        let mut codec = Codec::new(t.clone());
        let download = codec.periph_download(0, vec![1; 10], 256);
        assert_eq!(download.total(), 10);
        drop(download);
        assert!(!t.touched());
    }

    #[test]
    fn test_empty_download_sends_header_only() {
        let t = ScriptedTransport::new(b"A");
        let mut codec = Codec::new(t.clone());
        assert_eq!(codec.periph_download(0, Vec::new(), 256).count(), 0);
        assert_eq!(t.written().len(), 6);
    }
}
