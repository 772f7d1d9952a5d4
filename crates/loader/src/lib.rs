// kmdlink - Debug Comms Driver
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bin;
pub mod elf;
pub mod error;
pub mod image;
pub mod kmd;
pub mod listing;

pub use error::{LoadError, LoadResult};
pub use image::{Chunk, Image, MemoryImage, SourceEntry, SourceMap, Symbol, SymbolTable};

use kmdlink_config::MemoryDescriptor;
use kmdlink_core::{MemoryWrite, Progress};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Binary,
    Listing,
    Kmd,
    Elf,
}

impl ImageFormat {
    const REGISTRY: [(&'static str, ImageFormat); 4] = [
        ("lst", ImageFormat::Listing),
        ("kmd", ImageFormat::Kmd),
        ("elf", ImageFormat::Elf),
        ("bin", ImageFormat::Binary),
    ];

    /// Pick a format by extension, case-insensitively. Anything unknown is
    /// loaded as raw binary.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        Self::REGISTRY
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, f)| *f)
            .unwrap_or(ImageFormat::Binary)
    }

    pub fn extensions() -> impl Iterator<Item = &'static str> {
        Self::REGISTRY.iter().map(|(e, _)| *e)
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Binary => "binary",
            ImageFormat::Listing => "listing",
            ImageFormat::Kmd => "kmd",
            ImageFormat::Elf => "elf",
        }
    }

    pub fn parse(self, data: &[u8], memory: &MemoryDescriptor) -> LoadResult<Image> {
        let image = match self {
            ImageFormat::Binary => bin::parse(data, memory),
            ImageFormat::Listing => listing::parse(data, memory)?,
            ImageFormat::Kmd => kmd::parse(data, memory)?,
            ImageFormat::Elf => elf::parse(data)?,
        };
        debug!(
            "Parsed {} image: {} writes, {} source entries, {} symbols",
            self.name(),
            image.memory.len(),
            image.source.len(),
            image.symbols.len()
        );
        Ok(image)
    }
}

/// Read and parse an image file, choosing the format from its extension.
pub fn read_image(path: &Path, memory: &MemoryDescriptor) -> LoadResult<Image> {
    let data = std::fs::read(path)?;
    let format = ImageFormat::from_path(path);
    info!("Loading {:?} as {} image", path, format.name());
    format.parse(&data, memory)
}

/// Shared flag that stops an [`ImageLoad`] at its next step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Single-pass write of a parsed image. Each step writes one chunk and
/// reports cumulative progress. Stopping early leaves the chunks already
/// written in place.
///
/// The writer is released as soon as the load ends, whether it finished,
/// failed or was cancelled.
pub struct ImageLoad<W> {
    chunks: std::vec::IntoIter<Chunk>,
    memory: MemoryDescriptor,
    writer: Option<W>,
    cancel: CancelToken,
    total: u64,
    completed: u64,
}

impl<W: MemoryWrite> ImageLoad<W> {
    pub fn new(
        image: MemoryImage,
        memory: MemoryDescriptor,
        writer: W,
        cancel: CancelToken,
    ) -> Self {
        let chunks = image.into_chunks();
        Self {
            total: chunks.len() as u64,
            chunks: chunks.into_iter(),
            memory,
            writer: Some(writer),
            cancel,
            completed: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn finish(&mut self) {
        self.writer = None;
    }
}

impl<W: MemoryWrite> Iterator for ImageLoad<W> {
    type Item = LoadResult<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() && self.writer.is_some() {
            debug!("Image load cancelled after {} of {}", self.completed, self.total);
            self.finish();
        }
        let writer = self.writer.as_mut()?;
        let Some(chunk) = self.chunks.next() else {
            self.finish();
            return None;
        };

        if let Err(source) = writer.write_memory(&self.memory, 1, chunk.addr, &chunk.words) {
            self.finish();
            return Some(Err(LoadError::Write {
                address: chunk.addr,
                source,
            }));
        }

        self.completed += 1;
        if self.completed == self.total {
            self.finish();
        }
        Some(Ok(Progress {
            completed: self.completed,
            total: self.total,
        }))
    }
}

impl<W: MemoryWrite> std::iter::FusedIterator for ImageLoad<W> {}

#[cfg(test)]
mod tests {
    use super::*;
    use kmdlink_core::{DeviceError, DeviceResult, ProtocolError};
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct RecordingWriter {
        writes: Arc<Mutex<Vec<(u32, Vec<u64>)>>>,
        fail_at: Option<u32>,
    }

    impl MemoryWrite for RecordingWriter {
        fn write_memory(
            &mut self,
            _memory: &MemoryDescriptor,
            _elem_size_words: u32,
            addr: u32,
            values: &[u64],
        ) -> DeviceResult<()> {
            if self.fail_at == Some(addr) {
                return Err(DeviceError::Protocol(ProtocolError::ShortRead {
                    expected: 1,
                    got: 0,
                }));
            }
            self.writes.lock().unwrap().push((addr, values.to_vec()));
            Ok(())
        }
    }

    fn memory() -> MemoryDescriptor {
        MemoryDescriptor {
            index: 0,
            names: vec!["Memory".into()],
            addr_width_bits: 16,
            word_width_bits: 16,
            size: None,
        }
    }

    fn listing_image() -> MemoryImage {
        ImageFormat::Listing
            .parse(b"0: 0001\n1: 0002\n2: 0003\n", &memory())
            .unwrap()
            .memory
    }

    #[test]
    fn test_format_registry() {
        assert_eq!(ImageFormat::from_path(Path::new("a.lst")), ImageFormat::Listing);
        assert_eq!(ImageFormat::from_path(Path::new("a.KMD")), ImageFormat::Kmd);
        assert_eq!(ImageFormat::from_path(Path::new("a.elf")), ImageFormat::Elf);
        assert_eq!(ImageFormat::from_path(Path::new("a.img")), ImageFormat::Binary);
        assert_eq!(ImageFormat::from_path(Path::new("noext")), ImageFormat::Binary);
        assert_eq!(ImageFormat::extensions().count(), 4);
    }

    #[test]
    fn test_writes_interleave_with_progress() {
        let writer = RecordingWriter::default();
        let mut load = ImageLoad::new(listing_image(), memory(), writer.clone(), CancelToken::new());

        assert_eq!(load.total(), 3);
        assert!(writer.writes.lock().unwrap().is_empty());

        let first = load.next().unwrap().unwrap();
        assert_eq!(first, Progress { completed: 1, total: 3 });
        assert_eq!(writer.writes.lock().unwrap().len(), 1);

        let rest: Vec<_> = load.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(rest.last(), Some(&Progress { completed: 3, total: 3 }));
        assert!(load.next().is_none());
        assert_eq!(
            *writer.writes.lock().unwrap(),
            vec![(0, vec![1]), (1, vec![2]), (2, vec![3])]
        );
    }

    #[test]
    fn test_cancel_stops_between_steps() {
        let writer = RecordingWriter::default();
        let cancel = CancelToken::new();
        let mut load = ImageLoad::new(listing_image(), memory(), writer.clone(), cancel.clone());

        assert!(load.next().unwrap().is_ok());
        cancel.cancel();
        assert!(load.next().is_none());
        assert_eq!(writer.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_write_failure_ends_load() {
        let writer = RecordingWriter {
            fail_at: Some(1),
            ..Default::default()
        };
        let results: Vec<_> =
            ImageLoad::new(listing_image(), memory(), writer.clone(), CancelToken::new()).collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(LoadError::Write { address: 1, .. })));
        // Nothing is rolled back.
        assert_eq!(writer.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_writer_released_when_load_ends() {
        let writer = RecordingWriter::default();
        let mut load = ImageLoad::new(listing_image(), memory(), writer.clone(), CancelToken::new());
        assert_eq!(Arc::strong_count(&writer.writes), 2);

        load.next();
        load.next();
        assert_eq!(Arc::strong_count(&writer.writes), 2);
        assert_eq!(load.next().unwrap().unwrap().completed, 3);
        assert_eq!(Arc::strong_count(&writer.writes), 1);
        assert!(load.next().is_none());
    }

    #[test]
    fn test_elf_progress_is_global() {
        let image = ImageFormat::Elf
            .parse(&elf::tests::sample_elf(), &memory())
            .unwrap();
        let writer = RecordingWriter::default();
        let progress: Vec<_> = ImageLoad::new(image.memory, memory(), writer.clone(), CancelToken::new())
            .map(|p| p.unwrap())
            .collect();

        assert_eq!(progress.len(), 6);
        assert!(progress.iter().all(|p| p.total == 6));
        assert_eq!(progress[4].completed, 5);
    }
}
